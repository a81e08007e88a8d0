//! LLaVA 1.6 (Mistral) on ONNX Runtime.
//!
//! Only the base 336px tile is encoded. Each `<image>` token in the prompt
//! expands to every row the vision encoder returns. Prompts are rendered
//! with the chat template shipped next to the tokenizer.

use std::path::Path;

use image::DynamicImage;

use crate::backend::{ChatTurn, LlavaInputs, LlavaModel, ASSISTANT_DELIMITER};
use crate::device::DeviceSelection;
use crate::error::{InferenceError, InferenceResult, RuntimeError};
use crate::types::ModelKind;

use super::generate::expand_placeholder;
use super::preprocess::{preprocess, ImageNorm};
use super::template::ChatTemplate;
use super::LoadedModel;

const KIND: ModelKind = ModelKind::Llava;

/// Placeholder the processor expands into image features.
pub const IMAGE_TOKEN: &str = "<image>";

pub struct OrtLlava {
    model: LoadedModel,
    template: ChatTemplate,
    eos: u32,
    image_token: u32,
}

impl OrtLlava {
    pub fn load(dir: &Path, selection: DeviceSelection) -> InferenceResult<Self> {
        let model = LoadedModel::load(KIND, dir, selection)?;
        let template = ChatTemplate::load(dir)
            .map_err(|e| InferenceError::model(KIND.as_str(), e.to_string()))?
            .unwrap_or_else(|| {
                tracing::info!("{KIND} ships no chat template; using the Mistral format");
                ChatTemplate::mistral()
            });
        check_template(&template);

        Ok(Self {
            eos: model.token_id(KIND, "</s>")?,
            image_token: model.token_id(KIND, IMAGE_TOKEN)?,
            template,
            model,
        })
    }
}

/// Warn when a template would defeat answer extraction or image expansion.
fn check_template(template: &ChatTemplate) {
    match template.render(&[ChatTurn::user_with_image("")], true) {
        Ok(rendered) => {
            if !rendered.contains(ASSISTANT_DELIMITER) {
                tracing::warn!(
                    "{KIND} chat template does not emit {ASSISTANT_DELIMITER}; \
                     responses will include the prompt"
                );
            }
            if !rendered.contains(IMAGE_TOKEN) {
                tracing::warn!("{KIND} chat template does not emit {IMAGE_TOKEN}");
            }
        }
        Err(e) => tracing::warn!("{KIND} chat template failed a sample render: {e}"),
    }
}

impl LlavaModel for OrtLlava {
    fn apply_chat_template(
        &self,
        conversation: &[ChatTurn],
        add_generation_prompt: bool,
    ) -> InferenceResult<String> {
        if conversation.is_empty() {
            return Err(InferenceError::generation(KIND.as_str(), "empty conversation"));
        }
        self.template
            .render(conversation, add_generation_prompt)
            .map_err(|e| InferenceError::generation(KIND.as_str(), e.to_string()))
    }

    fn prepare(&self, image: &DynamicImage, text: &str) -> InferenceResult<LlavaInputs> {
        let input_ids = self.model.encode(KIND, text, true)?;
        Ok(LlavaInputs {
            pixel_values: preprocess(image, &ImageNorm::LLAVA),
            attention_mask: vec![1; input_ids.len()],
            input_ids,
        })
    }

    fn generate(&self, inputs: &LlavaInputs, max_new_tokens: usize) -> InferenceResult<Vec<u32>> {
        let fail = |e: RuntimeError| InferenceError::generation(KIND.as_str(), e.to_string());

        let image_features = self.model.vision.encode(&inputs.pixel_values).map_err(fail)?;
        let text_embeds = self
            .model
            .language
            .embedder
            .embed(&inputs.input_ids)
            .map_err(fail)?;
        let embeds = expand_placeholder(
            &inputs.input_ids,
            &text_embeds,
            self.image_token,
            &image_features,
        )
        .map_err(fail)?;

        // Expanded positions are all attended, like the text they replace.
        let attention_mask = vec![1i64; embeds.nrows()];
        let generated = self
            .model
            .language
            .greedy(embeds, &attention_mask, max_new_tokens, self.eos)
            .map_err(fail)?;

        let mut ids = inputs.input_ids.clone();
        ids.extend(generated);
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> InferenceResult<String> {
        self.model.decode(KIND, ids)
    }
}
