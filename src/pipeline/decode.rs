//! Image validation and decoding.
//!
//! Decoding is the pipeline's first line of defense against hostile input:
//! the byte-size ceiling is checked before any parsing, and the decoded
//! dimensions are read from the image header and validated before the pixel
//! buffer is allocated.

use crate::core::config::ServiceLimits;
use crate::core::errors::ExtractError;
use crate::pipeline::raster::{DecodedRaster, RawImage};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;

/// Decodes and validates an upload into a canonical RGB raster.
pub fn decode(raw: RawImage, limits: &ServiceLimits) -> Result<DecodedRaster, ExtractError> {
    if raw.bytes.is_empty() {
        return Err(ExtractError::invalid_image("empty request body"));
    }

    if raw.bytes.len() as u64 > limits.max_image_bytes {
        return Err(ExtractError::ImageTooLarge {
            actual: raw.bytes.len() as u64,
            limit: limits.max_image_bytes,
            unit: "bytes",
        });
    }

    let reader = ImageReader::new(Cursor::new(&raw.bytes))
        .with_guessed_format()
        .map_err(|e| ExtractError::invalid_image(format!("unreadable image header: {e}")))?;

    let format = reader
        .format()
        .ok_or_else(|| ExtractError::invalid_image("unrecognized image format"))?;

    if let Some(declared) = raw.declared_type.as_deref() {
        validate_declared_type(declared, format)?;
    }

    // Header-only dimension probe; rejects decompression bombs before the
    // pixel buffer exists.
    let (width, height) = reader.into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(ExtractError::invalid_image("zero-sized image"));
    }
    let largest_side = width.max(height);
    if largest_side > limits.max_dimension {
        return Err(ExtractError::ImageTooLarge {
            actual: u64::from(largest_side),
            limit: u64::from(limits.max_dimension),
            unit: "pixels per side",
        });
    }

    let decoded = ImageReader::with_format(Cursor::new(&raw.bytes), format).decode()?;

    Ok(DecodedRaster {
        pixels: decoded.to_rgb8(),
    })
}

/// Rejects uploads whose declared MIME type contradicts the sniffed format.
fn validate_declared_type(declared: &str, sniffed: ImageFormat) -> Result<(), ExtractError> {
    // Generic types carry no format claim to check.
    if declared == "application/octet-stream" || declared == "*/*" {
        return Ok(());
    }

    match ImageFormat::from_mime_type(declared) {
        Some(expected) if expected == sniffed => Ok(()),
        Some(expected) => Err(ExtractError::invalid_image(format!(
            "declared content type {declared} ({expected:?}) does not match image data ({sniffed:?})"
        ))),
        None => Err(ExtractError::invalid_image(format!(
            "unsupported content type {declared}"
        ))),
    }
}
