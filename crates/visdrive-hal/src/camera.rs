//! Generic `FrameSource` trait and supporting types for image-capture
//! hardware.

use serde::{Deserialize, Serialize};
use visdrive_types::DriveError;

/// Pixel layout of [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, `width * height * 3` bytes.
    Rgb8,
    /// 8-bit greyscale, `width * height` bytes.
    Gray8,
    /// An already-encoded JPEG image.
    Jpeg,
}

/// A single image returned by a frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels (0 when unknown, e.g. undecoded JPEG).
    pub width: u32,
    /// Frame height in pixels (0 when unknown).
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    /// An all-black RGB frame.
    pub fn blank_rgb(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            data: vec![0u8; width as usize * height as usize * 3],
        }
    }

    /// Wrap encoded JPEG bytes without decoding them.
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Jpeg,
            data,
        }
    }

    /// `true` when the buffer length matches the declared dimensions.
    ///
    /// Encoded frames are only checked for being non-empty.
    pub fn is_well_formed(&self) -> bool {
        let pixels = self.width as usize * self.height as usize;
        match self.format {
            PixelFormat::Rgb8 => pixels > 0 && self.data.len() == pixels * 3,
            PixelFormat::Gray8 => pixels > 0 && self.data.len() == pixels,
            PixelFormat::Jpeg => !self.data.is_empty(),
        }
    }
}

/// A camera or any other device that can be asked for the next frame.
///
/// The session controller owns its frame source exclusively for the whole
/// session and calls [`release`][FrameSource::release] exactly once on the
/// way out.
pub trait FrameSource: Send {
    /// Stable identifier for this source, e.g. `"front_rgb"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::FrameUnavailable`] if no frame can be captured
    /// (device disconnected, buffer empty, source already released).
    fn next_frame(&mut self) -> Result<Frame, DriveError>;

    /// Release the underlying device.  Later captures must fail.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the device could not be
    /// released cleanly.
    fn release(&mut self) -> Result<(), DriveError> {
        Ok(())
    }
}
