//! Moondream2 adapter.
//!
//! Two-step native convention: encode the image once, then answer the
//! question against that embedding. The answer is returned unmodified.

use image::DynamicImage;
use ndarray::Array2;

use crate::device::DeviceSelection;
use crate::error::InferenceResult;
use crate::runtime::OrtMoondream;
use crate::types::{InferenceRequest, InferenceResponse, ModelDescriptor, ModelKind};

use super::{AdapterConfig, BackendAdapter};

/// Projected image features, one row per image token.
#[derive(Debug, Clone)]
pub struct ImageEmbedding {
    pub embeds: Array2<f32>,
}

/// Native Moondream2 interface.
pub trait MoondreamModel: Send + Sync {
    fn encode_image(&self, image: &DynamicImage) -> InferenceResult<ImageEmbedding>;

    fn answer_question(&self, embedding: &ImageEmbedding, question: &str) -> InferenceResult<String>;
}

pub struct MoondreamAdapter {
    descriptor: ModelDescriptor,
    model: Box<dyn MoondreamModel>,
}

impl MoondreamAdapter {
    pub fn with_model(descriptor: ModelDescriptor, model: Box<dyn MoondreamModel>) -> Self {
        Self { descriptor, model }
    }
}

impl BackendAdapter for MoondreamAdapter {
    const KIND: ModelKind = ModelKind::Moondream2;

    fn initialize(config: &AdapterConfig, selection: DeviceSelection) -> InferenceResult<Self> {
        let model = OrtMoondream::load(&config.model_dir, selection)?;
        Ok(Self::with_model(
            config.descriptor(Self::KIND, selection),
            Box::new(model),
        ))
    }

    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn infer(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        let embedding = self.model.encode_image(&request.image)?;
        let answer = self.model.answer_question(&embedding, &request.prompt)?;
        Ok(InferenceResponse::new(answer))
    }
}
