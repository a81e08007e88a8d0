//! Wire tensors in the KServe v2 JSON shape.

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, InferenceResult};

/// Tensor element type, named as on the wire (`UINT8`, `BYTES`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Bf16,
    Fp32,
    Fp64,
    /// Variable-length byte strings; carries text
    Bytes,
}

impl DataType {
    /// Whether elements of this type are byte strings.
    pub fn is_text(&self) -> bool {
        matches!(self, DataType::Bytes)
    }

    /// Wire name, e.g. `"UINT8"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Uint32 => "UINT32",
            DataType::Uint64 => "UINT64",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Fp16 => "FP16",
            DataType::Bf16 => "BF16",
            DataType::Fp32 => "FP32",
            DataType::Fp64 => "FP64",
            DataType::Bytes => "BYTES",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat tensor contents.
///
/// The JSON protocol carries `BYTES` elements as strings, so text elements
/// are always valid UTF-8 once deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TensorData {
    Text(Vec<String>),
    Uint8(Vec<u8>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Text(values) => values.len(),
            TensorData::Uint8(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, typed, shaped tensor crossing the serving boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub datatype: DataType,
    pub data: TensorData,
}

impl WireTensor {
    /// One-dimensional `UINT8` tensor holding `bytes` verbatim.
    pub fn uint8(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            shape: vec![bytes.len() as i64],
            datatype: DataType::Uint8,
            data: TensorData::Uint8(bytes),
        }
    }

    /// One-dimensional text tensor tagged with `datatype`.
    pub fn text(name: impl Into<String>, datatype: DataType, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            shape: vec![values.len() as i64],
            datatype,
            data: TensorData::Text(values),
        }
    }

    /// Number of elements implied by the shape.
    pub fn element_count(&self) -> InferenceResult<usize> {
        self.shape.iter().try_fold(1usize, |acc, &dim| {
            usize::try_from(dim)
                .ok()
                .and_then(|dim| acc.checked_mul(dim))
                .ok_or_else(|| {
                    InferenceError::decode(format!(
                        "tensor '{}' has invalid shape {:?}",
                        self.name, self.shape
                    ))
                })
        })
    }

    /// Check that the shape agrees with the number of data elements.
    pub fn check_shape(&self) -> InferenceResult<()> {
        let expected = self.element_count()?;
        if expected != self.data.len() {
            return Err(InferenceError::decode(format!(
                "tensor '{}' has shape {:?} ({expected} elements) but carries {} elements",
                self.name,
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Find a tensor by name.
pub fn find_tensor<'a>(tensors: &'a [WireTensor], name: &str) -> InferenceResult<&'a WireTensor> {
    tensors
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| InferenceError::decode(format!("missing tensor '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_wire_names() {
        assert_eq!(serde_json::to_string(&DataType::Uint8).unwrap(), "\"UINT8\"");
        assert_eq!(serde_json::to_string(&DataType::Bytes).unwrap(), "\"BYTES\"");
        assert_eq!(serde_json::to_string(&DataType::Fp16).unwrap(), "\"FP16\"");
        let parsed: DataType = serde_json::from_str("\"BF16\"").unwrap();
        assert_eq!(parsed, DataType::Bf16);
        assert_eq!(DataType::Int64.to_string(), "INT64");
    }

    #[test]
    fn test_text_tensor_json() {
        let tensor = WireTensor::text("prompt", DataType::Bytes, vec!["hi".to_string()]);
        let json = serde_json::to_value(&tensor).unwrap();
        assert_eq!(json["name"], "prompt");
        assert_eq!(json["shape"], serde_json::json!([1]));
        assert_eq!(json["datatype"], "BYTES");
        assert_eq!(json["data"], serde_json::json!(["hi"]));
    }

    #[test]
    fn test_uint8_tensor_json_roundtrip() {
        let tensor = WireTensor::uint8("image", vec![137, 80, 78, 71]);
        let json = serde_json::to_string(&tensor).unwrap();
        assert!(json.contains("\"data\":[137,80,78,71]"));
        let parsed: WireTensor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tensor);
    }

    #[test]
    fn test_check_shape_mismatch() {
        let mut tensor = WireTensor::uint8("image", vec![1, 2, 3]);
        assert!(tensor.check_shape().is_ok());

        tensor.shape = vec![1, 3];
        assert!(tensor.check_shape().is_ok());

        tensor.shape = vec![4];
        let err = tensor.check_shape().unwrap_err();
        assert!(err.to_string().contains("carries 3 elements"));

        tensor.shape = vec![-1];
        assert!(tensor.check_shape().is_err());
    }

    #[test]
    fn test_find_tensor() {
        let tensors = vec![
            WireTensor::uint8("image", vec![1]),
            WireTensor::text("prompt", DataType::Bytes, vec!["p".to_string()]),
        ];
        assert_eq!(find_tensor(&tensors, "prompt").unwrap().name, "prompt");
        assert!(matches!(
            find_tensor(&tensors, "missing"),
            Err(InferenceError::Decode { .. })
        ));
    }
}
