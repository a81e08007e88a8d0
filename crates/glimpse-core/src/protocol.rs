//! KServe v2 (Open Inference Protocol) JSON messages.
//!
//! Only the subset needed for image description is modelled: health,
//! metadata, repository index and single-response inference.

use serde::{Deserialize, Serialize};

use crate::codec::{DataType, WireTensor, GENERATED_TEXT_OUTPUT, IMAGE_INPUT, PROMPT_INPUT};
use crate::types::ModelKind;

/// Protocol version reported for every model.
pub const MODEL_VERSION: &str = "1";

/// Platform string reported in model metadata.
pub const PLATFORM: &str = "onnxruntime";

/// `GET /v2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Shape and dtype of one model input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMetadata {
    pub name: String,
    pub datatype: DataType,
    /// `-1` marks a variable dimension
    pub shape: Vec<i64>,
}

/// `GET /v2/models/{model}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
    pub platform: String,
    pub inputs: Vec<TensorMetadata>,
    pub outputs: Vec<TensorMetadata>,
}

impl ModelMetadata {
    /// Metadata for a loaded model whose output is declared as `output_dtype`.
    pub fn describe(kind: ModelKind, output_dtype: DataType) -> Self {
        Self {
            name: kind.to_string(),
            versions: vec![MODEL_VERSION.to_string()],
            platform: PLATFORM.to_string(),
            inputs: vec![
                TensorMetadata {
                    name: IMAGE_INPUT.to_string(),
                    datatype: DataType::Uint8,
                    shape: vec![-1],
                },
                TensorMetadata {
                    name: PROMPT_INPUT.to_string(),
                    datatype: DataType::Bytes,
                    shape: vec![1],
                },
            ],
            outputs: vec![TensorMetadata {
                name: GENERATED_TEXT_OUTPUT.to_string(),
                datatype: output_dtype,
                shape: vec![1],
            }],
        }
    }
}

/// Load state reported by the repository index.
///
/// Other servers may report states this crate never produces; those parse
/// as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelState {
    Ready,
    Unavailable,
    Loading,
    Unloading,
    #[serde(other)]
    Unknown,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Unavailable => "UNAVAILABLE",
            Self::Loading => "LOADING",
            Self::Unloading => "UNLOADING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One entry of `POST /v2/repository/index`.
///
/// `state` is absent for models the server knows about but never loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryModel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ModelState>,
    #[serde(default)]
    pub reason: String,
}

impl RepositoryModel {
    pub fn is_ready(&self) -> bool {
        self.state == Some(ModelState::Ready)
    }
}

/// Output requested by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedOutput {
    pub name: String,
}

/// `POST /v2/models/{model}/infer` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub inputs: Vec<WireTensor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<RequestedOutput>,
}

impl InferRequest {
    /// A request carrying `image` and `prompt` tensors, asking for `generated_text`.
    pub fn new(image: WireTensor, prompt: WireTensor) -> Self {
        Self {
            id: None,
            inputs: vec![image, prompt],
            outputs: vec![RequestedOutput {
                name: GENERATED_TEXT_OUTPUT.to_string(),
            }],
        }
    }
}

/// `POST /v2/models/{model}/infer` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponse {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub outputs: Vec<WireTensor>,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RequestCodec;

    #[test]
    fn test_infer_request_json_shape() {
        let (image, prompt) = RequestCodec::encode_parts(vec![1, 2, 3], "hi");
        let request = InferRequest::new(image, prompt);
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("id").is_none());
        assert_eq!(json["inputs"][0]["name"], "image");
        assert_eq!(json["inputs"][0]["datatype"], "UINT8");
        assert_eq!(json["inputs"][0]["shape"][0], 3);
        assert_eq!(json["inputs"][1]["datatype"], "BYTES");
        assert_eq!(json["inputs"][1]["data"][0], "hi");
        assert_eq!(json["outputs"][0]["name"], "generated_text");
    }

    #[test]
    fn test_infer_request_without_outputs_parses() {
        let request: InferRequest = serde_json::from_str(
            r#"{"inputs":[{"name":"prompt","shape":[1],"datatype":"BYTES","data":["x"]}]}"#,
        )
        .unwrap();
        assert!(request.outputs.is_empty());
        assert_eq!(request.inputs.len(), 1);
    }

    #[test]
    fn test_repository_model_state_is_uppercase() {
        let entry = RepositoryModel {
            name: "llava".into(),
            version: None,
            state: Some(ModelState::Unavailable),
            reason: "missing files".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"state\":\"UNAVAILABLE\""));
        assert!(!json.contains("version"));
    }

    #[test]
    fn test_repository_index_parses_transitional_states() {
        let index: Vec<RepositoryModel> = serde_json::from_str(
            r#"[
                {"name":"llava","version":"1","state":"LOADING","reason":""},
                {"name":"kosmos2","version":"1","state":"UNLOADING","reason":""},
                {"name":"moondream2","version":"1","state":"DRAINING"}
            ]"#,
        )
        .unwrap();
        assert_eq!(index[0].state, Some(ModelState::Loading));
        assert_eq!(index[1].state, Some(ModelState::Unloading));
        assert_eq!(index[2].state, Some(ModelState::Unknown));
        assert!(index.iter().all(|m| !m.is_ready()));
    }

    #[test]
    fn test_repository_index_parses_entry_without_state() {
        let index: Vec<RepositoryModel> =
            serde_json::from_str(r#"[{"name":"kosmos2"}]"#).unwrap();
        assert_eq!(index[0].name, "kosmos2");
        assert_eq!(index[0].state, None);
        assert_eq!(index[0].version, None);
        assert!(index[0].reason.is_empty());
    }

    #[test]
    fn test_model_metadata_declares_io() {
        let metadata = ModelMetadata::describe(ModelKind::Kosmos2, DataType::Bytes);
        assert_eq!(metadata.name, "kosmos2");
        assert_eq!(metadata.inputs[0].name, "image");
        assert_eq!(metadata.inputs[0].datatype, DataType::Uint8);
        assert_eq!(metadata.inputs[1].name, "prompt");
        assert_eq!(metadata.outputs[0].name, "generated_text");
        assert_eq!(metadata.outputs[0].datatype, DataType::Bytes);
    }
}
