use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::exif::FileTimesSnapshot;

/// How files reach the export tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    pub fn from_move_flag(move_files: bool) -> Self {
        if move_files { Self::Move } else { Self::Copy }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
        }
    }
}

/// Copy or move `src` to `dest`, creating parent directories.
///
/// Copies keep the source's modification time. Moves rename when possible
/// and fall back to copy + delete across filesystems.
pub fn transfer(src: &Path, dest: &Path, mode: TransferMode) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    match mode {
        TransferMode::Copy => copy_with_times(src, dest),
        TransferMode::Move => {
            if let Err(e) = fs::rename(src, dest) {
                log::debug!(
                    "Rename {} -> {} failed ({e}), copying instead",
                    src.display(),
                    dest.display()
                );
                copy_with_times(src, dest)?;
                fs::remove_file(src)
                    .with_context(|| format!("Failed to remove {} after copy", src.display()))?;
            }
            Ok(())
        }
    }
}

fn copy_with_times(src: &Path, dest: &Path) -> Result<()> {
    let times = FileTimesSnapshot::capture(src)?;
    fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    times.restore(dest)
}
