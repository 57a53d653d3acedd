//! Image payload decoding and resolution normalization.
//!
//! A payload is decoded once into a [`DecodedImage`]; each consumer then asks for
//! the working resolution it needs. Sources smaller than [`MIN_SOURCE_EDGE`] on
//! either side are rejected instead of upsampled.

use crate::types::{ColorBuffer, PixelBuffer};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::GenericImageView;
use std::borrow::Cow;
use thiserror::Error;

/// Smallest accepted source edge length, in pixels.
pub const MIN_SOURCE_EDGE: u32 = 80;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a recognizable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image is {width}x{height}, below the {min}x{min} minimum")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("target size must be at least 1 pixel")]
    ZeroTargetSize,
}

/// An encoded image as handed over by the caller.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// Header-prefixed binary (PNG, JPEG, ...).
    Encoded(Vec<u8>),
    /// Base64 text, optionally carrying a `data:image/...;base64,` prefix.
    Base64(String),
}

impl ImagePayload {
    fn bytes(&self) -> Result<Cow<'_, [u8]>, DecodeError> {
        match self {
            ImagePayload::Encoded(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            ImagePayload::Base64(text) => {
                let body = strip_data_url(text.trim());
                Ok(Cow::Owned(STANDARD.decode(body)?))
            }
        }
    }
}

impl From<Vec<u8>> for ImagePayload {
    fn from(bytes: Vec<u8>) -> Self {
        ImagePayload::Encoded(bytes)
    }
}

/// `data:image/png;base64,AAAA` → `AAAA`. Anything without the prefix passes through.
fn strip_data_url(text: &str) -> &str {
    if text.starts_with("data:") {
        if let Some((_, body)) = text.split_once(',') {
            return body;
        }
    }
    text
}

/// A decoded source image, kept at full resolution in both grayscale and RGB.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    gray: Vec<u8>,
    rgb: Vec<u8>,
}

impl DecodedImage {
    /// Decode a payload, rejecting undersized sources.
    pub fn decode(payload: &ImagePayload) -> Result<Self, DecodeError> {
        let bytes = payload.bytes()?;
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let image = image::load_from_memory(&bytes)?;
        let (width, height) = image.dimensions();
        if width < MIN_SOURCE_EDGE || height < MIN_SOURCE_EDGE {
            return Err(DecodeError::TooSmall {
                width,
                height,
                min: MIN_SOURCE_EDGE,
            });
        }

        tracing::trace!(width, height, color = ?image.color(), "decoded image payload");

        Ok(Self {
            width,
            height,
            gray: image.to_luma8().into_raw(),
            rgb: image.to_rgb8().into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Grayscale buffer resized to `size × size`.
    pub fn normalize(&self, size: u32) -> PixelBuffer {
        let data = resize_bilinear(&self.gray, self.width, self.height, 1, size, size);
        PixelBuffer::sized(size, size, data)
    }

    /// RGB buffer resized to `size × size`.
    pub fn normalize_color(&self, size: u32) -> ColorBuffer {
        let data = resize_bilinear(&self.rgb, self.width, self.height, 3, size, size);
        ColorBuffer::sized(size, size, data)
    }
}

/// Decode `payload` and return it as a `target_size × target_size` grayscale buffer.
pub fn normalize(payload: &ImagePayload, target_size: u32) -> Result<PixelBuffer, DecodeError> {
    if target_size == 0 {
        return Err(DecodeError::ZeroTargetSize);
    }
    Ok(DecodedImage::decode(payload)?.normalize(target_size))
}

/// Bilinear resample of an interleaved `channels`-per-pixel image.
///
/// Pixel-center aligned, so a same-size resample is an exact copy.
fn resize_bilinear(
    src: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    new_w: u32,
    new_h: u32,
) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    let (new_w, new_h) = (new_w as usize, new_h as usize);
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    let mut out = vec![0u8; new_w * new_h * channels];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..channels {
                let tl = src[(y0 * width + x0) * channels + c] as f32;
                let tr = src[(y0 * width + x1) * channels + c] as f32;
                let bl = src[(y1 * width + x0) * channels + c] as f32;
                let br = src[(y1 * width + x1) * channels + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                out[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
