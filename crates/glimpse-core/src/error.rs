//! Error types for Glimpse.
//!
//! Inference errors are scoped to a single request unless noted otherwise:
//! a decode, dispatch, generation or encoding failure never tears down a
//! loaded adapter.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for Glimpse operations.
#[derive(Error, Debug)]
pub enum GlimpseError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Inference, dispatch and wire codec errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors raised while serving or requesting an image description.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Malformed image or prompt on the wire
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Model name outside the supported set
    #[error("Unsupported model: {name}")]
    UnsupportedModel { name: String },

    /// Model name is supported but its adapter is not loaded
    #[error("Model not ready: {name}")]
    ModelNotReady { name: String },

    /// No usable compute backend at start-up (fatal)
    #[error("Device unavailable: {device}: {message}")]
    DeviceUnavailable { device: String, message: String },

    /// Model files missing or failed to load
    #[error("Failed to load {model}: {message}")]
    Model { model: String, message: String },

    /// Model invocation failed for one request
    #[error("Generation failed for {model}: {message}")]
    Generation { model: String, message: String },

    /// Response dtype/schema mismatch or unencodable value
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    /// Surfaced by the transport collaborator
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status_code: Option<u16>,
    },
}

/// Failures inside an ONNX Runtime session or a chat template.
///
/// Callers map these to `InferenceError::Model` while loading and to
/// `InferenceError::Generation` while serving a request.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Graph or tokenizer could not be loaded
    #[error("Failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// A session run failed
    #[error("{graph} failed: {message}")]
    Run { graph: &'static str, message: String },

    /// A graph output was missing or had an unexpected shape
    #[error("Unexpected {tensor} output: {message}")]
    Output {
        tensor: &'static str,
        message: String,
    },

    /// Embedding rows or token counts that do not line up
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Chat template failed to load or render
    #[error("Chat template error: {0}")]
    Template(String),
}

impl RuntimeError {
    pub(crate) fn run(graph: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Run {
            graph,
            message: err.to_string(),
        }
    }

    pub(crate) fn output(tensor: &'static str, message: impl Into<String>) -> Self {
        Self::Output {
            tensor,
            message: message.into(),
        }
    }
}

impl InferenceError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    pub(crate) fn generation(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            model: model.into(),
            message: message.into(),
        }
    }

    pub(crate) fn model(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Convenience type alias for Glimpse results.
pub type Result<T> = std::result::Result<T, GlimpseError>;

/// Convenience type alias for inference-specific results.
pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

/// Result of a runtime session call.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = InferenceError::generation("kosmos2", "out of memory");
        assert_eq!(
            err.to_string(),
            "Generation failed for kosmos2: out of memory"
        );

        let err = InferenceError::UnsupportedModel {
            name: "nonexistent".to_string(),
        };
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::run("decoder", "CUDA out of memory");
        assert_eq!(err.to_string(), "decoder failed: CUDA out of memory");

        let err = RuntimeError::Load {
            path: PathBuf::from("/m/llava/decoder_model.onnx"),
            message: "not found".into(),
        };
        assert!(err.to_string().contains("decoder_model.onnx"));
    }

    #[test]
    fn test_inference_error_wraps_into_top_level() {
        let err: GlimpseError = InferenceError::decode("bad png").into();
        assert!(matches!(err, GlimpseError::Inference(InferenceError::Decode { .. })));
    }
}
