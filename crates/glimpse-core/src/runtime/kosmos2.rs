//! Kosmos-2 on ONNX Runtime.
//!
//! Input layout: `<s> <image> [64 image slots] </image> prompt`. The slot
//! embeddings are overwritten by the 64 projected image features.

use std::path::Path;

use image::DynamicImage;

use crate::backend::{GroundedInputs, Kosmos2Model};
use crate::device::DeviceSelection;
use crate::error::{InferenceError, InferenceResult, RuntimeError};
use crate::types::ModelKind;

use super::generate::splice_rows;
use super::preprocess::{preprocess, ImageNorm};
use super::LoadedModel;

/// Image features produced per image.
pub const IMAGE_TOKENS: usize = 64;

const KIND: ModelKind = ModelKind::Kosmos2;

pub struct OrtKosmos2 {
    model: LoadedModel,
    bos: u32,
    eos: u32,
    boi: u32,
    eoi: u32,
    pad: u32,
}

impl OrtKosmos2 {
    pub fn load(dir: &Path, selection: DeviceSelection) -> InferenceResult<Self> {
        let model = LoadedModel::load(KIND, dir, selection)?;
        Ok(Self {
            bos: model.token_id(KIND, "<s>")?,
            eos: model.token_id(KIND, "</s>")?,
            boi: model.token_id(KIND, "<image>")?,
            eoi: model.token_id(KIND, "</image>")?,
            pad: model.token_id(KIND, "<pad>")?,
            model,
        })
    }
}

/// Token ids and image-slot mask for a tokenized prompt.
pub fn grounded_layout(
    prompt_ids: &[u32],
    bos: u32,
    boi: u32,
    eoi: u32,
    pad: u32,
) -> (Vec<u32>, Vec<bool>) {
    let mut ids = Vec::with_capacity(prompt_ids.len() + IMAGE_TOKENS + 3);
    ids.push(bos);
    ids.push(boi);
    ids.extend(std::iter::repeat(pad).take(IMAGE_TOKENS));
    ids.push(eoi);
    ids.extend_from_slice(prompt_ids);

    let mask = (0..ids.len())
        .map(|i| (2..2 + IMAGE_TOKENS).contains(&i))
        .collect();
    (ids, mask)
}

impl Kosmos2Model for OrtKosmos2 {
    fn process(&self, prompt: &str, image: &DynamicImage) -> InferenceResult<GroundedInputs> {
        let prompt_ids = self.model.encode(KIND, prompt, false)?;
        let (input_ids, image_embeds_position_mask) =
            grounded_layout(&prompt_ids, self.bos, self.boi, self.eoi, self.pad);
        Ok(GroundedInputs {
            pixel_values: preprocess(image, &ImageNorm::KOSMOS2),
            attention_mask: vec![1; input_ids.len()],
            input_ids,
            image_embeds_position_mask,
        })
    }

    fn generate(&self, inputs: &GroundedInputs, max_new_tokens: usize) -> InferenceResult<Vec<u32>> {
        let fail = |e: RuntimeError| InferenceError::generation(KIND.as_str(), e.to_string());

        let image_embeds = self.model.vision.encode(&inputs.pixel_values).map_err(fail)?;
        let mut embeds = self
            .model
            .language
            .embedder
            .embed(&inputs.input_ids)
            .map_err(fail)?;

        let positions: Vec<usize> = inputs
            .image_embeds_position_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &is_image)| is_image.then_some(i))
            .collect();
        splice_rows(&mut embeds, &positions, &image_embeds).map_err(fail)?;

        let generated = self
            .model
            .language
            .greedy(embeds, &inputs.attention_mask, max_new_tokens, self.eos)
            .map_err(fail)?;

        let mut ids = inputs.input_ids.clone();
        ids.extend(generated);
        Ok(ids)
    }

    fn batch_decode(&self, ids: &[u32]) -> InferenceResult<String> {
        self.model.decode(KIND, ids)
    }
}
