//! Request encoding and decoding.
//!
//! Images always travel as PNG so the wire bytes do not depend on the format
//! the caller started from.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use super::tensor::{find_tensor, DataType, TensorData, WireTensor};
use crate::error::{InferenceError, InferenceResult};
use crate::types::InferenceRequest;

/// Name of the encoded-image input tensor.
pub const IMAGE_INPUT: &str = "image";

/// Name of the prompt input tensor.
pub const PROMPT_INPUT: &str = "prompt";

/// Converts between [`InferenceRequest`] and the `image`/`prompt` wire tensors.
pub struct RequestCodec;

impl RequestCodec {
    /// Decode the two wire inputs into a request.
    pub fn decode(image: &WireTensor, prompt: &WireTensor) -> InferenceResult<InferenceRequest> {
        let prompt = decode_prompt(prompt)?;
        let image = decode_image(image_bytes(image)?)?;
        Ok(InferenceRequest { image, prompt })
    }

    /// Decode a request from an input list, looking tensors up by name.
    pub fn decode_inputs(inputs: &[WireTensor]) -> InferenceResult<InferenceRequest> {
        let image = find_tensor(inputs, IMAGE_INPUT)?;
        let prompt = find_tensor(inputs, PROMPT_INPUT)?;
        Self::decode(image, prompt)
    }

    /// Encode a request, serializing the image to PNG.
    pub fn encode(request: &InferenceRequest) -> InferenceResult<(WireTensor, WireTensor)> {
        let png = image_to_png(&request.image)?;
        Ok(Self::encode_parts(png, &request.prompt))
    }

    /// Build the wire inputs from already-encoded image bytes.
    pub fn encode_parts(image_bytes: Vec<u8>, prompt: &str) -> (WireTensor, WireTensor) {
        (
            WireTensor::uint8(IMAGE_INPUT, image_bytes),
            WireTensor::text(PROMPT_INPUT, DataType::Bytes, vec![prompt.to_string()]),
        )
    }
}

fn image_bytes(tensor: &WireTensor) -> InferenceResult<&[u8]> {
    if tensor.datatype != DataType::Uint8 {
        return Err(InferenceError::decode(format!(
            "input '{}' must be UINT8, got {}",
            tensor.name, tensor.datatype
        )));
    }
    tensor.check_shape()?;
    match &tensor.data {
        TensorData::Uint8(bytes) if !bytes.is_empty() => Ok(bytes.as_slice()),
        TensorData::Uint8(_) => Err(InferenceError::decode(format!(
            "input '{}' is empty",
            tensor.name
        ))),
        TensorData::Text(_) => Err(InferenceError::decode(format!(
            "input '{}' carries text data but is declared UINT8",
            tensor.name
        ))),
    }
}

fn decode_prompt(tensor: &WireTensor) -> InferenceResult<String> {
    if !tensor.datatype.is_text() {
        return Err(InferenceError::decode(format!(
            "input '{}' must be BYTES, got {}",
            tensor.name, tensor.datatype
        )));
    }
    tensor.check_shape()?;
    let values = match &tensor.data {
        TensorData::Text(values) => values,
        TensorData::Uint8(_) => {
            return Err(InferenceError::decode(format!(
                "input '{}' carries numeric data but is declared BYTES",
                tensor.name
            )))
        }
    };
    match values.as_slice() {
        [prompt] if prompt.is_empty() => Err(InferenceError::decode("prompt is empty")),
        [prompt] => Ok(prompt.clone()),
        other => Err(InferenceError::decode(format!(
            "input '{}' must hold exactly one element, got {}",
            tensor.name,
            other.len()
        ))),
    }
}

/// Decode encoded image bytes, detecting the format from content.
pub fn decode_image(bytes: &[u8]) -> InferenceResult<DynamicImage> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| InferenceError::decode(format!("Cannot detect image format: {e}")))?;
    if reader.format().is_none() {
        return Err(InferenceError::decode(
            "image bytes are not a recognized image format",
        ));
    }
    reader
        .decode()
        .map_err(|e| InferenceError::decode(format!("Invalid image: {e}")))
}

/// Serialize an image to PNG.
pub fn image_to_png(image: &DynamicImage) -> InferenceResult<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| InferenceError::encoding(format!("Cannot encode image as PNG: {e}")))?;
    Ok(buf)
}

/// Re-encode arbitrary encoded image bytes as PNG.
pub fn normalize_image_bytes(bytes: &[u8]) -> InferenceResult<Vec<u8>> {
    image_to_png(&decode_image(bytes)?)
}
