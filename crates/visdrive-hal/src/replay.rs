//! [`DirectoryFrameSource`] – replays JPEG files from a directory.
//!
//! Useful for bench runs without a camera: point the session at a folder of
//! recorded frames and it cycles through them in file-name order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use visdrive_types::DriveError;

use crate::camera::{Frame, FrameSource};

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

/// Frame source backed by `*.jpg` / `*.jpeg` files.
#[derive(Debug)]
pub struct DirectoryFrameSource {
    id: String,
    files: Vec<PathBuf>,
    cursor: usize,
    released: bool,
}

impl DirectoryFrameSource {
    /// Scan `dir` for JPEG files.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the directory cannot be read
    /// or holds no JPEG files.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DriveError> {
        let dir = dir.as_ref();
        let component = dir.display().to_string();
        let entries = fs::read_dir(dir)
            .map_err(|e| DriveError::hardware(component.clone(), format!("cannot read: {e}")))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_jpeg(path))
            .collect();
        if files.is_empty() {
            return Err(DriveError::hardware(component, "no JPEG frames found"));
        }
        files.sort();
        debug!(dir = %component, frames = files.len(), "frame directory opened");

        Ok(Self {
            id: format!("dir:{component}"),
            files,
            cursor: 0,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectoryFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> Result<Frame, DriveError> {
        if self.released {
            return Err(DriveError::FrameUnavailable(format!("{} released", self.id)));
        }
        let path = &self.files[self.cursor % self.files.len()];
        self.cursor = self.cursor.wrapping_add(1);
        let data = fs::read(path).map_err(|e| {
            DriveError::FrameUnavailable(format!("{}: {e}", path.display()))
        })?;
        if data.is_empty() {
            return Err(DriveError::FrameUnavailable(format!(
                "{}: empty file",
                path.display()
            )));
        }
        Ok(Frame::jpeg(data))
    }

    fn release(&mut self) -> Result<(), DriveError> {
        self.released = true;
        Ok(())
    }
}
