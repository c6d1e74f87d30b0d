//! Generic `Camera` trait plus a directory-backed camera driver.

use std::fs;
use std::path::{Path, PathBuf};

use latchkey_types::{Frame, LatchError};
use tracing::debug;

/// An image-capture device.
///
/// The capture stage owns exactly one camera and guarantees that
/// [`Camera::release`] is called once when it exits, whether or not
/// [`Camera::open`] succeeded.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"door_cam"`.
    fn id(&self) -> &str;

    /// Acquire the device.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::CameraUnavailable`] if the device cannot be
    /// opened.
    fn open(&mut self) -> Result<(), LatchError>;

    /// Read the next encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::CameraUnavailable`] if no frame can be read.
    fn read_frame(&mut self) -> Result<Frame, LatchError>;

    /// Release the device. Safe to call on a camera that never opened.
    fn release(&mut self);
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A camera that replays the image files of a directory in name order,
/// wrapping around at the end.
pub struct DirectoryCamera {
    id: String,
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
}

impl DirectoryCamera {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            sequence: 0,
        }
    }

    /// Directory this camera replays.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

impl Camera for DirectoryCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), LatchError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            LatchError::CameraUnavailable(format!("{}: {e}", self.dir.display()))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && Self::is_image(p))
            .collect();
        if files.is_empty() {
            return Err(LatchError::CameraUnavailable(format!(
                "no images in {}",
                self.dir.display()
            )));
        }
        files.sort();
        debug!(camera = %self.id, images = files.len(), "directory camera opened");
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, LatchError> {
        if self.files.is_empty() {
            return Err(LatchError::CameraUnavailable(format!(
                "camera '{}' is not open",
                self.id
            )));
        }
        let path = &self.files[self.cursor];
        let data = fs::read(path).map_err(|e| {
            LatchError::CameraUnavailable(format!("{}: {e}", path.display()))
        })?;
        self.cursor = (self.cursor + 1) % self.files.len();
        self.sequence += 1;
        Ok(Frame::new(data, self.sequence))
    }

    fn release(&mut self) {
        self.files.clear();
        self.cursor = 0;
    }
}
