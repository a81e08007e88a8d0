//! Response encoding and decoding for the `generated_text` output.

use super::tensor::{find_tensor, DataType, TensorData, WireTensor};
use crate::error::{InferenceError, InferenceResult};
use crate::types::InferenceResponse;

/// Name of the generated-text output tensor.
pub const GENERATED_TEXT_OUTPUT: &str = "generated_text";

/// Converts between [`InferenceResponse`] and the `generated_text` tensor.
pub struct ResponseCodec;

impl ResponseCodec {
    /// Encode generated text as a single-element tensor tagged `output_dtype`.
    ///
    /// `output_dtype` comes from the adapter's descriptor. Anything other than
    /// a byte-string type is a schema mismatch and is rejected.
    pub fn encode(
        response: &InferenceResponse,
        output_dtype: DataType,
    ) -> InferenceResult<WireTensor> {
        if !output_dtype.is_text() {
            return Err(InferenceError::encoding(format!(
                "output '{GENERATED_TEXT_OUTPUT}' is declared {output_dtype}, expected BYTES"
            )));
        }
        Ok(WireTensor::text(
            GENERATED_TEXT_OUTPUT,
            output_dtype,
            vec![response.text.clone()],
        ))
    }

    /// Extract the generated text from a response's outputs.
    pub fn decode(outputs: &[WireTensor]) -> InferenceResult<String> {
        let tensor = find_tensor(outputs, GENERATED_TEXT_OUTPUT)?;
        if !tensor.datatype.is_text() {
            return Err(InferenceError::decode(format!(
                "output '{GENERATED_TEXT_OUTPUT}' has non-text dtype {}",
                tensor.datatype
            )));
        }
        tensor.check_shape()?;
        match &tensor.data {
            TensorData::Text(values) if values.len() == 1 => Ok(values[0].clone()),
            other => Err(InferenceError::decode(format!(
                "output '{GENERATED_TEXT_OUTPUT}' must hold exactly one text element, got {}",
                other.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tags_declared_dtype() {
        let tensor =
            ResponseCodec::encode(&InferenceResponse::new("a cat"), DataType::Bytes).unwrap();
        assert_eq!(tensor.name, GENERATED_TEXT_OUTPUT);
        assert_eq!(tensor.datatype, DataType::Bytes);
        assert_eq!(tensor.shape, vec![1]);
        assert_eq!(tensor.data, TensorData::Text(vec!["a cat".to_string()]));
    }

    #[test]
    fn test_encode_rejects_non_text_dtype() {
        for dtype in [DataType::Fp32, DataType::Uint8, DataType::Int64] {
            let err = ResponseCodec::encode(&InferenceResponse::new("x"), dtype).unwrap_err();
            assert!(matches!(err, InferenceError::Encoding { .. }), "{dtype}");
        }
    }

    #[test]
    fn test_encode_empty_text_is_still_one_element() {
        let tensor = ResponseCodec::encode(&InferenceResponse::new(""), DataType::Bytes).unwrap();
        assert_eq!(tensor.data.len(), 1);
        assert_eq!(ResponseCodec::decode(&[tensor]).unwrap(), "");
    }

    #[test]
    fn test_decode_missing_output() {
        let err = ResponseCodec::decode(&[]).unwrap_err();
        assert!(err.to_string().contains("generated_text"));
    }

    #[test]
    fn test_decode_rejects_numeric_output() {
        let tensor = WireTensor::uint8(GENERATED_TEXT_OUTPUT, vec![104, 105]);
        assert!(matches!(
            ResponseCodec::decode(&[tensor]),
            Err(InferenceError::Decode { .. })
        ));
    }
}
