//! Core data types shared by the serving side and the client.

use std::fmt;
use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::codec::DataType;
use crate::device::{Device, Precision};
use crate::error::InferenceError;

/// Prompt used by `moondream2` and `llava` when the caller does not supply one.
pub const DEFAULT_PROMPT: &str = "Describe this image in detail.";

/// Kosmos-2 default prompt; the `<grounding>` tag asks for grounded output.
pub const DEFAULT_GROUNDING_PROMPT: &str = "<grounding>Describe this image in detail.";

/// The closed set of vision-language models Glimpse can serve.
///
/// Names are matched exactly; there is no fuzzy matching and no default model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Moondream2,
    Kosmos2,
    Llava,
}

impl ModelKind {
    /// Every supported model, in repository-index order.
    pub const ALL: [ModelKind; 3] = [ModelKind::Moondream2, ModelKind::Kosmos2, ModelKind::Llava];

    /// Wire name of the model.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Moondream2 => "moondream2",
            ModelKind::Kosmos2 => "kosmos2",
            ModelKind::Llava => "llava",
        }
    }

    /// Conventional prompt for this model.
    pub fn default_prompt(&self) -> &'static str {
        match self {
            ModelKind::Moondream2 | ModelKind::Llava => DEFAULT_PROMPT,
            ModelKind::Kosmos2 => DEFAULT_GROUNDING_PROMPT,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = InferenceError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "moondream2" => Ok(ModelKind::Moondream2),
            "kosmos2" => Ok(ModelKind::Kosmos2),
            "llava" => Ok(ModelKind::Llava),
            other => Err(InferenceError::UnsupportedModel {
                name: other.to_string(),
            }),
        }
    }
}

/// A decoded request: one raster image plus a non-empty prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub image: DynamicImage,
    pub prompt: String,
}

impl InferenceRequest {
    pub fn new(image: DynamicImage, prompt: impl Into<String>) -> Self {
        Self {
            image,
            prompt: prompt.into(),
        }
    }
}

/// Generated text for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
}

impl InferenceResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Immutable description of a loaded model, fixed at adapter initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub name: ModelKind,
    /// Declared dtype of the `generated_text` output tensor
    pub output_dtype: DataType,
    pub device: Device,
    pub precision: Precision,
}
