//! Sub-configuration structs with defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::DataType;
use crate::device::DevicePreference;
use crate::types::ModelKind;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where model files are stored, one subdirectory per model
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("~/.glimpse/models"),
        }
    }
}

/// Client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the inference server (KServe v2 HTTP protocol)
    pub url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: crate::client::DEFAULT_URL.to_string(),
        }
    }
}

/// Serving-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Models loaded at start-up
    pub models: Vec<ModelKind>,

    /// Declared dtype of the `generated_text` output
    pub output_dtype: DataType,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            models: ModelKind::ALL.to_vec(),
            output_dtype: DataType::Bytes,
        }
    }
}

/// Compute device settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// "auto" walks CUDA, CoreML, CPU in order; anything else is required
    pub preference: DevicePreference,
}

/// Pinned location of one model's files.
///
/// The upstream repository supplies the tokenizer and chat template. The
/// ONNX graphs come from `onnx`, an export of that checkpoint split into
/// vision encoder, token embedder and decoder. Upstream checkpoints do not
/// publish that layout, so without an export the graphs must be placed in
/// the model directory by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    /// Hugging Face repository identifier
    pub repo: String,

    /// Git revision (branch, tag or commit) the files are fetched from
    pub revision: String,

    /// Repository holding the ONNX export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onnx: Option<OnnxExport>,
}

/// Hugging Face repository holding an ONNX export of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnnxExport {
    pub repo: String,

    pub revision: String,

    /// Directory inside the repository holding the graphs
    #[serde(default = "default_onnx_dir")]
    pub dir: String,
}

fn default_onnx_dir() -> String {
    "onnx".to_string()
}

/// Download URL for `path` in `repo` at `revision`.
fn hub_url(repo: &str, revision: &str, path: &str) -> String {
    format!("https://huggingface.co/{repo}/resolve/{revision}/{path}")
}

impl ModelSource {
    fn pinned(repo: &str, revision: &str) -> Self {
        Self {
            repo: repo.to_string(),
            revision: revision.to_string(),
            onnx: None,
        }
    }

    /// Download URL for a file in the upstream repository.
    pub fn file_url(&self, remote_path: &str) -> String {
        hub_url(&self.repo, &self.revision, remote_path)
    }
}

impl OnnxExport {
    /// Download URL for a graph file in the export.
    pub fn graph_url(&self, file_name: &str) -> String {
        let dir = self.dir.trim_matches('/');
        if dir.is_empty() {
            hub_url(&self.repo, &self.revision, file_name)
        } else {
            hub_url(&self.repo, &self.revision, &format!("{dir}/{file_name}"))
        }
    }
}

/// Pinned sources for every supported model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub moondream2: ModelSource,
    pub kosmos2: ModelSource,
    pub llava: ModelSource,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            moondream2: ModelSource::pinned("vikhyatk/moondream2", "2025-01-09"),
            kosmos2: ModelSource::pinned("microsoft/kosmos-2-patch14-224", "main"),
            llava: ModelSource::pinned("llava-hf/llava-v1.6-mistral-7b-hf", "main"),
        }
    }
}

impl ModelsConfig {
    /// Source for a given model.
    pub fn source(&self, kind: ModelKind) -> &ModelSource {
        match kind {
            ModelKind::Moondream2 => &self.moondream2,
            ModelKind::Kosmos2 => &self.kosmos2,
            ModelKind::Llava => &self.llava,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Output format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
