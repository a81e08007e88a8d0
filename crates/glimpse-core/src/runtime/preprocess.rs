//! Image preprocessing for the vision encoders.
//!
//! Every encoder takes a square RGB image, normalized per channel, in NCHW
//! layout `[1, 3, size, size]`. Models differ only in size and statistics.

use image::DynamicImage;
use ndarray::Array4;

/// Number of color channels (RGB).
const CHANNELS: usize = 3;

/// Resize target and per-channel normalization for one vision encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageNorm {
    pub size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

impl ImageNorm {
    /// Kosmos-2: CLIP ViT-L/14 at 224px.
    pub const KOSMOS2: ImageNorm = ImageNorm {
        size: 224,
        mean: CLIP_MEAN,
        std: CLIP_STD,
    };

    /// LLaVA 1.6: CLIP ViT-L/14 at 336px, single base tile.
    pub const LLAVA: ImageNorm = ImageNorm {
        size: 336,
        mean: CLIP_MEAN,
        std: CLIP_STD,
    };

    /// Moondream2: SigLIP at 378px, scaled to [-1, 1].
    pub const MOONDREAM: ImageNorm = ImageNorm {
        size: 378,
        mean: [0.5; 3],
        std: [0.5; 3],
    };
}

/// Resize, convert to RGB and normalize an image into an NCHW tensor.
pub fn preprocess(image: &DynamicImage, norm: &ImageNorm) -> Array4<f32> {
    let resized = image.resize_exact(
        norm.size,
        norm.size,
        image::imageops::FilterType::CatmullRom,
    );
    let rgb = resized.to_rgb8();

    let size = norm.size as usize;
    let mut tensor = Array4::<f32>::zeros((1, CHANNELS, size, size));

    // Walk the raw RGB buffer once instead of indexing the 4D array per pixel.
    let plane = size * size;
    if let Some(tensor_data) = tensor.as_slice_mut() {
        for (i, pixel) in rgb.as_raw().chunks_exact(CHANNELS).enumerate() {
            for (c, &val) in pixel.iter().enumerate() {
                tensor_data[c * plane + i] = (val as f32 / 255.0 - norm.mean[c]) / norm.std[c];
            }
        }
    }

    tensor
}
