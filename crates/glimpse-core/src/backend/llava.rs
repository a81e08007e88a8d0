//! LLaVA 1.6 (Mistral) adapter.
//!
//! The prompt is wrapped in a one-turn conversation and rendered through the
//! model's chat template. The decoded output contains the rendered template,
//! so only the text after the last `[/INST]` marker is kept.

use image::DynamicImage;
use ndarray::Array4;

use crate::device::DeviceSelection;
use crate::error::InferenceResult;
use crate::runtime::OrtLlava;
use crate::types::{InferenceRequest, InferenceResponse, ModelDescriptor, ModelKind};

use super::{AdapterConfig, BackendAdapter};

/// Generation budget per request.
pub const LLAVA_MAX_NEW_TOKENS: usize = 200;

/// Marker closing the user turn in the Mistral chat template.
pub const ASSISTANT_DELIMITER: &str = "[/INST]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One item of a chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Image,
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatTurn {
    /// A user turn holding an image followed by `prompt`.
    pub fn user_with_image(prompt: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Image, ContentPart::Text(prompt.into())],
        }
    }
}

/// Processor output for one image and rendered prompt.
#[derive(Debug, Clone)]
pub struct LlavaInputs {
    pub pixel_values: Array4<f32>,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<i64>,
}

/// Native LLaVA interface.
pub trait LlavaModel: Send + Sync {
    fn apply_chat_template(
        &self,
        conversation: &[ChatTurn],
        add_generation_prompt: bool,
    ) -> InferenceResult<String>;

    fn prepare(&self, image: &DynamicImage, text: &str) -> InferenceResult<LlavaInputs>;

    /// Prompt ids followed by up to `max_new_tokens` generated ids.
    fn generate(&self, inputs: &LlavaInputs, max_new_tokens: usize) -> InferenceResult<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> InferenceResult<String>;
}

pub struct LlavaAdapter {
    descriptor: ModelDescriptor,
    model: Box<dyn LlavaModel>,
}

impl LlavaAdapter {
    pub fn with_model(descriptor: ModelDescriptor, model: Box<dyn LlavaModel>) -> Self {
        Self { descriptor, model }
    }
}

impl BackendAdapter for LlavaAdapter {
    const KIND: ModelKind = ModelKind::Llava;

    fn initialize(config: &AdapterConfig, selection: DeviceSelection) -> InferenceResult<Self> {
        let model = OrtLlava::load(&config.model_dir, selection)?;
        Ok(Self::with_model(
            config.descriptor(Self::KIND, selection),
            Box::new(model),
        ))
    }

    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn infer(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        let conversation = [ChatTurn::user_with_image(request.prompt.as_str())];
        let rendered = self.model.apply_chat_template(&conversation, true)?;
        let inputs = self.model.prepare(&request.image, &rendered)?;
        let ids = self.model.generate(&inputs, LLAVA_MAX_NEW_TOKENS)?;
        let generated = self.model.decode(&ids)?;
        Ok(InferenceResponse::new(after_last_delimiter(&generated)))
    }
}

/// Text after the last `[/INST]`, trimmed; untouched if the marker is absent.
pub fn after_last_delimiter(text: &str) -> String {
    match text.rsplit_once(ASSISTANT_DELIMITER) {
        Some((_, answer)) => answer.trim().to_string(),
        None => text.to_string(),
    }
}
