//! Moondream2 on ONNX Runtime.

use std::path::Path;

use image::DynamicImage;
use ndarray::concatenate;
use ndarray::Axis;

use crate::backend::{ImageEmbedding, MoondreamModel};
use crate::device::DeviceSelection;
use crate::error::{InferenceError, InferenceResult, RuntimeError};
use crate::types::ModelKind;

use super::preprocess::{preprocess, ImageNorm};
use super::LoadedModel;

const KIND: ModelKind = ModelKind::Moondream2;

/// Answer length cap applied inside `answer_question`.
pub const MAX_ANSWER_TOKENS: usize = 512;

/// Moondream uses the same token to open and close a sequence.
const SEQUENCE_TOKEN: &str = "<|endoftext|>";

pub struct OrtMoondream {
    model: LoadedModel,
    boundary: u32,
}

impl OrtMoondream {
    pub fn load(dir: &Path, selection: DeviceSelection) -> InferenceResult<Self> {
        let model = LoadedModel::load(KIND, dir, selection)?;
        Ok(Self {
            boundary: model.token_id(KIND, SEQUENCE_TOKEN)?,
            model,
        })
    }
}

/// Text that follows the image embedding.
pub fn question_prompt(question: &str) -> String {
    format!("\n\nQuestion: {question}\n\nAnswer:")
}

impl MoondreamModel for OrtMoondream {
    fn encode_image(&self, image: &DynamicImage) -> InferenceResult<ImageEmbedding> {
        let pixel_values = preprocess(image, &ImageNorm::MOONDREAM);
        let embeds = self
            .model
            .vision
            .encode(&pixel_values)
            .map_err(|e| InferenceError::generation(KIND.as_str(), e.to_string()))?;
        Ok(ImageEmbedding { embeds })
    }

    fn answer_question(&self, embedding: &ImageEmbedding, question: &str) -> InferenceResult<String> {
        let fail = |e: RuntimeError| InferenceError::generation(KIND.as_str(), e.to_string());
        let language = &self.model.language;

        let prompt_ids = self.model.encode(KIND, &question_prompt(question), false)?;
        let bos = language.embedder.embed(&[self.boundary]).map_err(fail)?;
        let prompt = language.embedder.embed(&prompt_ids).map_err(fail)?;
        let prefix = concatenate(
            Axis(0),
            &[bos.view(), embedding.embeds.view(), prompt.view()],
        )
        .map_err(|e| fail(RuntimeError::Shape(format!("image embedding width mismatch: {e}"))))?;

        let attention_mask = vec![1i64; prefix.nrows()];
        let answer_ids = language
            .greedy(prefix, &attention_mask, MAX_ANSWER_TOKENS, self.boundary)
            .map_err(fail)?;

        Ok(self.model.decode(KIND, &answer_ids)?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_prompt() {
        assert_eq!(
            question_prompt("What is this?"),
            "\n\nQuestion: What is this?\n\nAnswer:"
        );
    }
}
