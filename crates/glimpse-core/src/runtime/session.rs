//! ONNX Runtime sessions for the three graphs every model is split into.
//!
//! - vision encoder: `pixel_values [1, 3, H, W]` to `image_embeds [1, N, D]`
//! - token embedder: `input_ids [1, T]` to `inputs_embeds [1, T, D]`
//! - decoder: `inputs_embeds [1, T, D]` + `attention_mask [1, T]` to `logits [1, T, V]`
//!
//! Each wraps a `Mutex<Session>` because `Session::run` requires `&mut self`.

use std::path::Path;
use std::sync::Mutex;

use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::Value;

use crate::device::{Device, DeviceSelection};
use crate::error::{RuntimeError, RuntimeResult};

/// Create a session for `model_path` on the selected device.
pub fn load_session(model_path: &Path, selection: DeviceSelection) -> RuntimeResult<Session> {
    let load_err = |message: String| RuntimeError::Load {
        path: model_path.to_path_buf(),
        message,
    };
    if !model_path.exists() {
        return Err(load_err("model file not found".to_string()));
    }

    let builder = Session::builder()
        .map_err(|e| load_err(format!("Failed to create ONNX session builder: {e}")))?;
    let builder = with_execution_provider(builder, selection.device).map_err(load_err)?;
    let session = builder
        .commit_from_file(model_path)
        .map_err(|e| load_err(e.to_string()))?;

    tracing::debug!(
        "Loaded {:?} on {} (inputs: {:?}, outputs: {:?})",
        model_path,
        selection,
        session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>()
    );

    Ok(session)
}

#[allow(unused_mut)]
fn with_execution_provider(
    mut builder: ort::session::builder::SessionBuilder,
    device: Device,
) -> Result<ort::session::builder::SessionBuilder, String> {
    match device {
        #[cfg(feature = "cuda")]
        Device::Cuda => {
            use ort::execution_providers::CUDAExecutionProvider;
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|e| format!("Failed to register CUDA execution provider: {e}"))?;
        }
        #[cfg(feature = "coreml")]
        Device::CoreMl => {
            use ort::execution_providers::CoreMLExecutionProvider;
            builder = builder
                .with_execution_providers([CoreMLExecutionProvider::default().build()])
                .map_err(|e| format!("Failed to register CoreML execution provider: {e}"))?;
        }
        Device::Cpu => {}
        #[allow(unreachable_patterns)]
        other => {
            return Err(format!(
                "glimpse was built without support for the {other} execution provider"
            ))
        }
    }
    Ok(builder)
}

fn lock<'a>(
    session: &'a Mutex<Session>,
    graph: &'static str,
) -> RuntimeResult<std::sync::MutexGuard<'a, Session>> {
    session
        .lock()
        .map_err(|e| RuntimeError::run(graph, format!("session lock poisoned: {e}")))
}

/// Collapse `[1, N, D]` or `[N, D]` output into an `[N, D]` matrix.
fn to_matrix(shape: &[i64], data: &[f32], output: &'static str) -> RuntimeResult<Array2<f32>> {
    let (rows, cols) = match shape {
        [1, n, d] | [n, d] => (*n as usize, *d as usize),
        _ => return Err(RuntimeError::output(output, format!("shape {shape:?}"))),
    };
    Array2::from_shape_vec((rows, cols), data.to_vec())
        .map_err(|e| RuntimeError::output(output, e.to_string()))
}

/// Vision tower plus projector.
pub struct VisionEncoder {
    session: Mutex<Session>,
    /// Name of the input tensor (detected from model metadata).
    input_name: String,
}

impl VisionEncoder {
    pub fn load(model_path: &Path, selection: DeviceSelection) -> RuntimeResult<Self> {
        let session = load_session(model_path, selection)?;
        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "pixel_values".to_string());
        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    /// Encode a preprocessed image into one embedding row per image token.
    pub fn encode(&self, pixel_values: &Array4<f32>) -> RuntimeResult<Array2<f32>> {
        const GRAPH: &str = "vision encoder";
        let shape: Vec<i64> = pixel_values.shape().iter().map(|&d| d as i64).collect();
        let flat_data: Vec<f32> = pixel_values.iter().copied().collect();
        let input_value =
            Value::from_array((shape, flat_data)).map_err(|e| RuntimeError::run(GRAPH, e))?;

        let mut session = lock(&self.session, GRAPH)?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| RuntimeError::run(GRAPH, e))?;

        let image_embeds = outputs
            .iter()
            .find(|(name, _)| *name == "image_embeds")
            .ok_or_else(|| RuntimeError::output("image_embeds", "missing"))?;
        let (shape, data) = image_embeds
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| RuntimeError::output("image_embeds", e.to_string()))?;
        let shape: Vec<i64> = shape.iter().copied().collect();

        to_matrix(&shape, data, "image_embeds")
    }
}

/// Token embedding table of the language model.
pub struct TokenEmbedder {
    session: Mutex<Session>,
}

impl TokenEmbedder {
    pub fn load(model_path: &Path, selection: DeviceSelection) -> RuntimeResult<Self> {
        Ok(Self {
            session: Mutex::new(load_session(model_path, selection)?),
        })
    }

    /// Look up one embedding row per token id.
    pub fn embed(&self, ids: &[u32]) -> RuntimeResult<Array2<f32>> {
        const GRAPH: &str = "token embedder";
        let input_ids: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
        let input_value = Value::from_array((vec![1i64, input_ids.len() as i64], input_ids))
            .map_err(|e| RuntimeError::run(GRAPH, e))?;

        let mut session = lock(&self.session, GRAPH)?;
        let outputs = session
            .run(ort::inputs!["input_ids" => input_value])
            .map_err(|e| RuntimeError::run(GRAPH, e))?;

        let inputs_embeds = outputs
            .iter()
            .find(|(name, _)| *name == "inputs_embeds")
            .ok_or_else(|| RuntimeError::output("inputs_embeds", "missing"))?;
        let (shape, data) = inputs_embeds
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| RuntimeError::output("inputs_embeds", e.to_string()))?;
        let shape: Vec<i64> = shape.iter().copied().collect();

        to_matrix(&shape, data, "inputs_embeds")
    }
}

/// Causal language model head, exported without a KV cache.
pub struct Decoder {
    session: Mutex<Session>,
}

impl Decoder {
    pub fn load(model_path: &Path, selection: DeviceSelection) -> RuntimeResult<Self> {
        Ok(Self {
            session: Mutex::new(load_session(model_path, selection)?),
        })
    }

    /// Logits for the position after the last row of `embeds`.
    pub fn next_token_logits(
        &self,
        embeds: &Array2<f32>,
        attention_mask: &[i64],
    ) -> RuntimeResult<Vec<f32>> {
        const GRAPH: &str = "decoder";
        let (seq_len, hidden) = embeds.dim();
        if seq_len == 0 {
            return Err(RuntimeError::Shape("cannot decode an empty sequence".to_string()));
        }
        if attention_mask.len() != seq_len {
            return Err(RuntimeError::Shape(format!(
                "attention_mask has {} entries for {seq_len} positions",
                attention_mask.len()
            )));
        }

        let flat_data: Vec<f32> = embeds.iter().copied().collect();
        let embeds_value = Value::from_array((vec![1i64, seq_len as i64, hidden as i64], flat_data))
            .map_err(|e| RuntimeError::run(GRAPH, e))?;
        let mask_value = Value::from_array((vec![1i64, seq_len as i64], attention_mask.to_vec()))
            .map_err(|e| RuntimeError::run(GRAPH, e))?;

        let mut session = lock(&self.session, GRAPH)?;
        let outputs = session
            .run(ort::inputs![
                "inputs_embeds" => embeds_value,
                "attention_mask" => mask_value
            ])
            .map_err(|e| RuntimeError::run(GRAPH, e))?;

        let logits = outputs
            .iter()
            .find(|(name, _)| *name == "logits")
            .ok_or_else(|| RuntimeError::output("logits", "missing"))?;
        let (shape, data) = logits
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| RuntimeError::output("logits", e.to_string()))?;

        // Either full-sequence [1, T, V] or last-position [1, V].
        let vocab = match shape.len() {
            2 | 3 => shape[shape.len() - 1] as usize,
            _ => return Err(RuntimeError::output("logits", format!("shape {:?}", shape))),
        };
        if vocab == 0 || data.len() < vocab {
            return Err(RuntimeError::output("logits", format!("shape {:?}", shape)));
        }
        Ok(data[data.len() - vocab..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_matrix_accepts_batched_and_flat() {
        let data = vec![0.0f32; 6];
        assert_eq!(to_matrix(&[1, 2, 3], &data, "x").unwrap().dim(), (2, 3));
        assert_eq!(to_matrix(&[3, 2], &data, "x").unwrap().dim(), (3, 2));
    }

    #[test]
    fn test_to_matrix_rejects_other_ranks() {
        let data = vec![0.0f32; 6];
        assert!(to_matrix(&[6], &data, "x").is_err());
        assert!(to_matrix(&[2, 1, 3], &data, "x").is_err());
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_session(&dir.path().join("missing.onnx"), DeviceSelection::cpu())
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Load { ref path, .. } if path.ends_with("missing.onnx")));
    }
}
