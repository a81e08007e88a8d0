//! Wire codecs for the model-serving boundary.
//!
//! Inputs are an `image` tensor (`UINT8`, encoded image bytes) and a `prompt`
//! tensor (`BYTES`, one UTF-8 element). The single output is
//! `generated_text` (`BYTES`, one UTF-8 element).

pub mod request;
pub mod response;
pub mod tensor;

pub use request::{
    decode_image, image_to_png, normalize_image_bytes, RequestCodec, IMAGE_INPUT, PROMPT_INPUT,
};
pub use response::{ResponseCodec, GENERATED_TEXT_OUTPUT};
pub use tensor::{DataType, TensorData, WireTensor};
