//! Raster types flowing between pipeline stages.
//!
//! Each stage consumes its input by value and produces the next
//! representation, so no raster is ever shared between requests or stages.

use image::{GrayImage, RgbImage};

/// An uploaded image before decoding: the opaque byte buffer and the content
/// type the caller declared for it.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// The raw upload.
    pub bytes: Vec<u8>,
    /// Declared MIME type, e.g. `image/png`. `None` means "sniff it".
    pub declared_type: Option<String>,
}

impl RawImage {
    /// Wraps an upload with its declared content type.
    pub fn new(bytes: Vec<u8>, declared_type: Option<String>) -> Self {
        Self {
            bytes,
            declared_type,
        }
    }
}

/// A decoded, validated raster in canonical RGB layout.
#[derive(Debug)]
pub struct DecodedRaster {
    /// Pixel data; dimensions are available via [`RgbImage::width`] and
    /// [`RgbImage::height`] and are guaranteed non-zero and within limits.
    pub pixels: RgbImage,
}

impl DecodedRaster {
    /// Raster width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Raster height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// A normalized single-channel raster ready for recognition.
///
/// Pixels are binarized: text-candidate pixels are 0 (ink), background 255.
/// Created once by the preprocessor and never mutated afterwards.
#[derive(Debug)]
pub struct PreprocessedRaster {
    /// Binarized pixel data, same dimensions as the decoded input.
    pub pixels: GrayImage,
    /// Set when the source image was uniform (no contrast at all); the
    /// recognition stage is skipped for blank rasters.
    pub blank: bool,
}

impl PreprocessedRaster {
    /// Raster width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Raster height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Marker for a uniform source image; carries the original geometry but
    /// no pixel content worth recognizing.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            pixels: GrayImage::from_pixel(width, height, image::Luma([255u8])),
            blank: true,
        }
    }
}
