//! Frame encoding for the oracle request: JPEG bytes wrapped in a base64
//! `data:` URL.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use visdrive_hal::{Frame, PixelFormat};

use crate::oracle::OracleError;

/// Return JPEG bytes for `frame`, encoding raw pixel buffers and passing
/// already-encoded JPEG frames through untouched.
///
/// # Errors
///
/// Returns [`OracleError::MalformedFrame`] when the buffer does not match the
/// declared dimensions and [`OracleError::Encode`] if JPEG encoding fails.
pub fn jpeg_bytes(frame: &Frame) -> Result<Vec<u8>, OracleError> {
    if !frame.is_well_formed() {
        return Err(OracleError::MalformedFrame(format!(
            "{:?} {}x{} with {} bytes",
            frame.format,
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }
    let image = match frame.format {
        PixelFormat::Jpeg => return Ok(frame.data.clone()),
        PixelFormat::Rgb8 => RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .map(DynamicImage::ImageRgb8),
        PixelFormat::Gray8 => GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .map(DynamicImage::ImageLuma8),
    }
    .ok_or_else(|| OracleError::MalformedFrame("pixel buffer too small".into()))?;

    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
    Ok(bytes)
}

/// `data:image/jpeg;base64,...` URL for an `image_url` message part.
///
/// # Errors
///
/// See [`jpeg_bytes`].
pub fn jpeg_data_url(frame: &Frame) -> Result<String, OracleError> {
    let jpeg = jpeg_bytes(frame)?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)))
}
