//! Metadata reading and writing for every supported media format.
//!
//! Four leaf writers, each taking a path and a [`MediaMetadata`]:
//!
//! - [`write_jpeg`]: EXIF APP1 segment, merged with what is already there
//! - [`write_png`]: EXIF `eXIf` chunk
//! - [`write_container`]: MP4/MOV `ilst` atoms
//! - [`ExifTool::write`]: the external `exiftool` program, for everything else
//!
//! [`read_embedded`] reads back what a writer produced, and [`bmp_to_png`]
//! converts bitmaps (which carry no EXIF) before writing.

mod container;
mod convert;
mod exiftool;
mod reader;
mod tiff;
mod writer;

pub use container::write_container;
pub use convert::bmp_to_png;
pub use exiftool::ExifTool;
pub use reader::{EmbeddedMetadata, read_embedded};
pub use writer::{write_jpeg, write_png};

use anyhow::{Context, Result};
use filetime::FileTime;
use serde::Serialize;
use std::path::Path;
use std::time::SystemTime;

use crate::sidecar::MediaMetadata;

/// The writer that embedded the metadata in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Jpeg,
    Png,
    Container,
    ExifTool,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Container => "container",
            Self::ExifTool => "exiftool",
        }
    }

    /// Write `meta` into `path` with this backend.
    pub fn write(&self, path: &Path, meta: &MediaMetadata, exiftool: &ExifTool) -> Result<()> {
        match self {
            Self::Jpeg => write_jpeg(path, meta),
            Self::Png => write_png(path, meta),
            Self::Container => write_container(path, meta),
            Self::ExifTool => exiftool.write(path, meta),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access and modification times of a file, captured before a write so they
/// can be put back afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileTimesSnapshot {
    accessed: FileTime,
    modified: FileTime,
}

impl FileTimesSnapshot {
    pub fn capture(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        Ok(Self {
            accessed: FileTime::from_last_access_time(&meta),
            modified: FileTime::from_last_modification_time(&meta),
        })
    }

    /// Put the captured times back. Works on read-only files too.
    pub fn restore(&self, path: &Path) -> Result<()> {
        filetime::set_file_times(path, self.accessed, self.modified)
            .with_context(|| format!("Failed to set file times on {}", path.display()))
    }
}

/// Set a file's modification time, leaving its access time alone.
pub fn set_modified(path: &Path, time: SystemTime) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::from_system_time(time))
        .with_context(|| format!("Failed to set modification time on {}", path.display()))
}
