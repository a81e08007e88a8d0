//! Kosmos-2 adapter.
//!
//! Native convention: a processor turns `(prompt, image)` into grounded
//! inputs, `generate` returns prompt plus continuation ids, and
//! `batch_decode` yields text that still contains the prompt.

use image::DynamicImage;
use ndarray::Array4;

use crate::error::InferenceResult;
use crate::runtime::OrtKosmos2;
use crate::types::{InferenceRequest, InferenceResponse, ModelDescriptor, ModelKind};

use super::{AdapterConfig, BackendAdapter};
use crate::device::DeviceSelection;

/// Generation budget per request.
pub const KOSMOS2_MAX_NEW_TOKENS: usize = 128;

/// Processor output for one image/prompt pair.
#[derive(Debug, Clone)]
pub struct GroundedInputs {
    pub pixel_values: Array4<f32>,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<i64>,
    /// True where an image embedding replaces the token embedding
    pub image_embeds_position_mask: Vec<bool>,
}

/// Native Kosmos-2 interface.
pub trait Kosmos2Model: Send + Sync {
    fn process(&self, prompt: &str, image: &DynamicImage) -> InferenceResult<GroundedInputs>;

    /// Prompt ids followed by up to `max_new_tokens` generated ids.
    fn generate(&self, inputs: &GroundedInputs, max_new_tokens: usize) -> InferenceResult<Vec<u32>>;

    fn batch_decode(&self, ids: &[u32]) -> InferenceResult<String>;
}

pub struct Kosmos2Adapter {
    descriptor: ModelDescriptor,
    model: Box<dyn Kosmos2Model>,
}

impl Kosmos2Adapter {
    pub fn with_model(descriptor: ModelDescriptor, model: Box<dyn Kosmos2Model>) -> Self {
        Self { descriptor, model }
    }
}

impl BackendAdapter for Kosmos2Adapter {
    const KIND: ModelKind = ModelKind::Kosmos2;

    fn initialize(config: &AdapterConfig, selection: DeviceSelection) -> InferenceResult<Self> {
        let model = OrtKosmos2::load(&config.model_dir, selection)?;
        Ok(Self::with_model(
            config.descriptor(Self::KIND, selection),
            Box::new(model),
        ))
    }

    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn infer(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        let inputs = self.model.process(&request.prompt, &request.image)?;
        let ids = self.model.generate(&inputs, KOSMOS2_MAX_NEW_TOKENS)?;
        let generated = self.model.batch_decode(&ids)?;
        Ok(InferenceResponse::new(strip_prompt(&generated, &request.prompt)))
    }
}

/// Remove every occurrence of `prompt` from `generated`, then trim.
///
/// Text that does not contain the prompt is returned untouched.
pub fn strip_prompt(generated: &str, prompt: &str) -> String {
    if !prompt.is_empty() && generated.contains(prompt) {
        generated.replace(prompt, "").trim().to_string()
    } else {
        generated.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{descriptor, sample_image, FakeKosmos2};
    use crate::error::InferenceError;

    fn adapter(caption: &str, failures: usize) -> Kosmos2Adapter {
        Kosmos2Adapter::with_model(
            descriptor(ModelKind::Kosmos2),
            Box::new(FakeKosmos2::failing(caption, failures)),
        )
    }

    #[test]
    fn test_strip_prompt_prefix() {
        assert_eq!(
            strip_prompt("Describe. A dog in a park.", "Describe."),
            "A dog in a park."
        );
    }

    #[test]
    fn test_strip_prompt_removes_every_occurrence() {
        assert_eq!(strip_prompt("hi there hi", "hi"), "there");
    }

    #[test]
    fn test_strip_prompt_absent_is_untouched() {
        assert_eq!(strip_prompt("  A dog.  ", "Describe."), "  A dog.  ");
    }

    #[test]
    fn test_infer_removes_prompt_echo() {
        let adapter = adapter(" A dog in a park.", 0);
        let request = InferenceRequest::new(sample_image(), "<grounding>Describe this image in detail.");
        let response = adapter.infer(&request).unwrap();
        assert_eq!(response.text, "A dog in a park.");
    }

    #[test]
    fn test_infer_generation_failure_propagates() {
        let adapter = adapter("unused", 1);
        let request = InferenceRequest::new(sample_image(), "Describe.");
        let err = adapter.infer(&request).unwrap_err();
        assert!(matches!(err, InferenceError::Generation { ref model, .. } if model == "kosmos2"));
    }

    #[test]
    fn test_adapter_usable_after_generation_failure() {
        let adapter = adapter(" A dog in a park.", 1);
        let request = InferenceRequest::new(sample_image(), "Describe.");
        assert!(adapter.infer(&request).is_err());
        assert_eq!(adapter.infer(&request).unwrap().text, "A dog in a park.");
    }

    #[test]
    fn test_descriptor_is_fixed() {
        let adapter = adapter("x", 0);
        let before = *adapter.descriptor();
        let _ = adapter.infer(&InferenceRequest::new(sample_image(), "p"));
        assert_eq!(*adapter.descriptor(), before);
    }
}
