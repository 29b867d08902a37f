//! Image decoding and face crop preparation.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("image has zero width or height")]
    ZeroSized,
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode encoded image bytes (PNG, JPEG, ...) into 3-channel RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let decoded = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = decoded.width(),
        height = decoded.height(),
        color = ?decoded.color(),
        "image decoded"
    );
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::ZeroSized);
    }
    Ok(to_rgb(decoded))
}

/// Normalize any channel layout to RGB: luma is replicated, alpha is dropped.
pub fn to_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Copy `region` out of `image`. `None` if the region is empty or not fully
/// inside the image.
pub fn crop_region(image: &RgbImage, region: &FaceRegion) -> Option<RgbImage> {
    if region.width == 0
        || region.height == 0
        || region.x2() > image.width()
        || region.y2() > image.height()
    {
        return None;
    }
    Some(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Bilinear resize to `size` x `size`.
pub fn resize_square(image: &RgbImage, size: u32) -> RgbImage {
    if image.width() == size && image.height() == size {
        return image.clone();
    }
    imageops::resize(image, size, size, FilterType::Triangle)
}
