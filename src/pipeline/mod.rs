//! Discovery, per-file processing, and the batch run.
//!
//! [`collect_media`] walks the source tree once and pairs every media file
//! with its sidecar. [`run`] then processes the entries on a bounded worker
//! pool and folds the per-file [`FileReport`]s into a [`Summary`].

mod batch;
mod task;
mod transfer;

pub use batch::{Progress, RunReport, Summary, run, run_with_progress, validate_paths};
pub use task::{FileReport, Job, Outcome, SkipReason, process_entry};
pub use transfer::{TransferMode, transfer};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::exif::Backend;
use crate::sidecar::{self, SidecarMatch};

/// The format family of a media file, determined by its extension.
///
/// # Example
///
/// ```rust
/// use takeout_merge::pipeline::MediaKind;
/// use std::path::Path;
///
/// assert_eq!(MediaKind::from_path(Path::new("IMG_0001.JPG")), Some(MediaKind::Jpeg));
/// assert_eq!(MediaKind::from_path(Path::new("clip.mov")), Some(MediaKind::Container));
/// assert_eq!(MediaKind::from_path(Path::new("IMG_0001.jpg.json")), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Jpeg,
    Png,
    /// BMP has no metadata container; converted to PNG before writing
    Bitmap,
    /// MP4/MOV/M4V
    Container,
    /// HEIC/HEIF/WebP/TIFF, written through exiftool
    External,
    /// GIF
    Animated,
}

/// What happens to a media file of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Write(Backend),
    /// Convert to PNG, then write with the PNG backend
    ConvertToPng,
    Unsupported(&'static str),
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "bmp" => Some(Self::Bitmap),
            "mp4" | "mov" | "m4v" => Some(Self::Container),
            "heic" | "heif" | "webp" | "tif" | "tiff" => Some(Self::External),
            "gif" => Some(Self::Animated),
            _ => None,
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Self::Jpeg => Route::Write(Backend::Jpeg),
            Self::Png => Route::Write(Backend::Png),
            Self::Bitmap => Route::ConvertToPng,
            Self::Container => Route::Write(Backend::Container),
            Self::External => Route::Write(Backend::ExifTool),
            Self::Animated => Route::Unsupported("animated GIF has no writable metadata"),
        }
    }
}

/// A media file found in the source tree, paired with its sidecar.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub source: PathBuf,
    /// Path relative to the source root; mirrored under the export root.
    pub relative: PathBuf,
    pub kind: MediaKind,
    pub sidecar: Option<SidecarMatch>,
    /// For bitmaps: relative path of the PNG the file is converted to.
    pub png_relative: Option<PathBuf>,
}

impl MediaEntry {
    pub fn new(
        source: PathBuf,
        relative: PathBuf,
        kind: MediaKind,
        sidecar: Option<SidecarMatch>,
    ) -> Self {
        let png_relative = (kind == MediaKind::Bitmap).then(|| relative.with_extension("png"));
        Self {
            source,
            relative,
            kind,
            sidecar,
            png_relative,
        }
    }
}

/// Everything found by one walk over the source tree.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Media files to process, in walk order.
    pub entries: Vec<MediaEntry>,
    /// Files that are neither media nor JSON.
    pub unsupported: usize,
    /// JSON files seen (sidecars or otherwise).
    pub json_files: usize,
    /// Media excluded by the file-type filter.
    pub filtered: usize,
}

/// Walk `source` and pair every media file with its sidecar.
///
/// The walk is sorted by file name so repeated runs see files in the same
/// order. Unreadable directory entries are logged and skipped.
pub fn collect_media(source: &Path, config: &Config) -> Discovery {
    let mut discovery = Discovery::default();

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        let Some(kind) = MediaKind::from_path(path) else {
            if is_json(path) {
                discovery.json_files += 1;
            } else {
                log::debug!("Skipping unsupported file: {}", path.display());
                discovery.unsupported += 1;
            }
            continue;
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if !config.filters.allows_extension(&ext) {
            log::debug!("Filtered by file type: {}", path.display());
            discovery.filtered += 1;
            continue;
        }

        let relative = path
            .strip_prefix(source)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

        discovery.entries.push(MediaEntry::new(
            path.to_path_buf(),
            relative,
            kind,
            sidecar::resolve(path, &config.sidecar),
        ));
    }

    assign_png_names(&mut discovery.entries);
    discovery
}

/// Give each bitmap a PNG name no other export path uses, so `scan.bmp`
/// never converts onto a real `scan.png`. Names compare case-insensitively.
fn assign_png_names(entries: &mut [MediaEntry]) {
    let mut taken: HashSet<String> = entries.iter().map(|e| path_key(&e.relative)).collect();

    for entry in entries.iter_mut().filter(|e| e.kind == MediaKind::Bitmap) {
        let preferred = entry.relative.with_extension("png");
        let png = std::iter::once(preferred.clone())
            .chain((0..).map(|n| {
                let mut name = entry.relative.clone().into_os_string();
                if n == 0 {
                    name.push(".png");
                } else {
                    name.push(format!("-{n}.png"));
                }
                PathBuf::from(name)
            }))
            .find(|candidate| !taken.contains(&path_key(candidate)))
            .unwrap_or(preferred.clone());

        if png != preferred {
            log::warn!(
                "{} would convert onto an existing file; using {}",
                entry.relative.display(),
                png.display()
            );
        }
        taken.insert(path_key(&png));
        entry.png_relative = Some(png);
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
