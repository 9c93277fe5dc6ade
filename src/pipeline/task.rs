use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::transfer::{TransferMode, transfer};
use super::{MediaEntry, Route};
use crate::config::Config;
use crate::exif::{self, Backend, ExifTool, FileTimesSnapshot};
use crate::sidecar::{MediaMetadata, Sidecar, SidecarMatch, load_sidecar};

/// Why a media file was left without new metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoSidecar,
    InvalidSidecar(String),
    /// The sidecar has no timestamp, location or description.
    NoMetadata,
    Unsupported(&'static str),
    /// The destination already exists and skip-existing is on.
    Existing,
    /// Outside the date or file-type filter.
    Filtered,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSidecar => "no_sidecar",
            Self::InvalidSidecar(_) => "invalid_sidecar",
            Self::NoMetadata => "no_metadata",
            Self::Unsupported(_) => "unsupported",
            Self::Existing => "existing",
            Self::Filtered => "filtered",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSidecar => f.write_str("no sidecar found"),
            Self::InvalidSidecar(e) => write!(f, "invalid sidecar: {e}"),
            Self::NoMetadata => f.write_str("sidecar has no usable metadata"),
            Self::Unsupported(why) => f.write_str(why),
            Self::Existing => f.write_str("destination already exists"),
            Self::Filtered => f.write_str("outside the date filter"),
        }
    }
}

/// Terminal state of one media file.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Written { final_path: PathBuf, backend: Backend },
    /// Dry run: metadata would have been written.
    Planned,
    Skipped(SkipReason),
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::Planned => "planned",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// What happened to one media file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub source: PathBuf,
    /// Mirrored path under the export root.
    pub dest: PathBuf,
    /// The sidecar, if one was paired with the file.
    pub sidecar: Option<PathBuf>,
    /// `true` once the media file is in the export tree.
    pub transferred: bool,
    pub outcome: Outcome,
}

impl FileReport {
    pub(crate) fn new(entry: &MediaEntry, export_root: &Path, outcome: Outcome) -> Self {
        Self {
            source: entry.source.clone(),
            dest: export_root.join(&entry.relative),
            sidecar: entry.sidecar.as_ref().map(|m| m.path.clone()),
            transferred: false,
            outcome,
        }
    }

    /// Where the file ended up (the `.png` for converted bitmaps).
    pub fn final_path(&self) -> &Path {
        match &self.outcome {
            Outcome::Written { final_path, .. } => final_path,
            _ => &self.dest,
        }
    }
}

/// Settings shared by every task of a run.
#[derive(Debug)]
pub struct Job {
    pub config: Config,
    pub export_root: PathBuf,
    exiftool: ExifTool,
    exiftool_available: bool,
}

impl Job {
    /// Probes the configured `exiftool` once for the whole run.
    pub fn new(config: Config, export_root: impl Into<PathBuf>) -> Self {
        let exiftool = ExifTool::new(&config.exiftool.program);
        let exiftool_available = match exiftool.version() {
            Some(version) => {
                log::info!("Using exiftool {version}");
                true
            }
            None => {
                log::warn!(
                    "exiftool not available at {}; HEIC/WebP/TIFF files will fail and native writers have no fallback",
                    exiftool.program().display()
                );
                false
            }
        };
        Self {
            config,
            export_root: export_root.into(),
            exiftool,
            exiftool_available,
        }
    }

    pub fn transfer_mode(&self) -> TransferMode {
        TransferMode::from_move_flag(self.config.transfer.move_files)
    }

    /// Write with `backend`, retrying with exiftool if a native writer fails.
    fn write_with_fallback(
        &self,
        path: &Path,
        backend: Backend,
        meta: &MediaMetadata,
    ) -> Result<Backend> {
        match backend.write(path, meta, &self.exiftool) {
            Ok(()) => Ok(backend),
            Err(e)
                if backend != Backend::ExifTool
                    && self.config.exiftool.fallback
                    && self.exiftool_available =>
            {
                log::warn!(
                    "{backend} writer failed for {}: {e:#}; retrying with exiftool",
                    path.display()
                );
                self.exiftool
                    .write(path, meta)
                    .with_context(|| format!("{backend} writer failed ({e:#}), exiftool fallback"))?;
                Ok(Backend::ExifTool)
            }
            Err(e) => Err(e),
        }
    }
}

/// Transfer one media file into the export tree and embed its sidecar's
/// metadata.
///
/// Never fails: errors end up in [`Outcome::Failed`]. Emits exactly one
/// log record describing the terminal state.
pub fn process_entry(entry: &MediaEntry, job: &Job) -> FileReport {
    let mut report = FileReport::new(entry, &job.export_root, Outcome::Planned);
    report.outcome = match run_entry(entry, job, &mut report) {
        Ok(outcome) => outcome,
        Err(e) => Outcome::Failed(format!("{e:#}")),
    };
    log_report(entry, &report);
    report
}

fn run_entry(entry: &MediaEntry, job: &Job, report: &mut FileReport) -> Result<Outcome> {
    let config = &job.config;
    let route = entry.kind.route();

    let sidecar: Option<Result<Sidecar, String>> = entry
        .sidecar
        .as_ref()
        .map(|m| load_sidecar(&m.path).map_err(|e| format!("{e:#}")));

    if let Some(Ok(ref record)) = sidecar {
        if let Some(epoch) = record.taken_epoch() {
            if !config.filters.allows_timestamp(epoch) {
                return Ok(Outcome::Skipped(SkipReason::Filtered));
            }
        }
    }

    let mut metadata = MediaMetadata::default();
    let pending = match (route, sidecar) {
        (Route::Unsupported(why), _) => Some(SkipReason::Unsupported(why)),
        (_, None) => Some(SkipReason::NoSidecar),
        (_, Some(Err(e))) => Some(SkipReason::InvalidSidecar(e)),
        (_, Some(Ok(record))) => {
            metadata = record.to_metadata();
            metadata.is_empty().then_some(SkipReason::NoMetadata)
        }
    };

    let final_dest = match (&pending, &entry.png_relative) {
        (None, Some(png)) if route == Route::ConvertToPng => job.export_root.join(png),
        _ => report.dest.clone(),
    };
    if config.transfer.skip_existing && final_dest.exists() {
        return Ok(Outcome::Skipped(SkipReason::Existing));
    }

    if config.dry_run {
        return Ok(pending.map_or(Outcome::Planned, Outcome::Skipped));
    }

    transfer(&entry.source, &report.dest, job.transfer_mode())?;
    report.transferred = true;

    if let Some(reason) = pending {
        return Ok(Outcome::Skipped(reason));
    }

    let (final_path, backend) = write_metadata(&report.dest, &final_dest, route, &metadata, job)?;
    Ok(Outcome::Written {
        final_path,
        backend,
    })
}

/// Dispatch to the writer for `route`, handling conversion and file times.
///
/// `target` is where the written file ends up; it differs from `path` only
/// for converted bitmaps.
fn write_metadata(
    path: &Path,
    target: &Path,
    route: Route,
    meta: &MediaMetadata,
    job: &Job,
) -> Result<(PathBuf, Backend)> {
    let times = FileTimesSnapshot::capture(path)?;

    let backend = match route {
        Route::Write(backend) => backend,
        Route::ConvertToPng => {
            exif::bmp_to_png(path, target)?;
            Backend::Png
        }
        Route::Unsupported(why) => anyhow::bail!("{why}"),
    };
    let target = target.to_path_buf();

    let used = job.write_with_fallback(&target, backend, meta)?;

    if job.config.transfer.preserve_mtime {
        times.restore(&target)?;
    } else if let Some(taken_at) = meta.taken_at {
        exif::set_modified(&target, SystemTime::from(taken_at))?;
    }

    Ok((target, used))
}

/// Convention pairings are routine; similarity guesses are worth a look.
fn match_level(found: &SidecarMatch) -> log::Level {
    if found.kind.is_exact() {
        log::Level::Debug
    } else {
        log::Level::Info
    }
}

fn log_report(entry: &MediaEntry, report: &FileReport) {
    if let Some(found) = &entry.sidecar {
        log::log!(
            match_level(found),
            source:% = report.source.display(),
            sidecar:% = found.path.display(),
            sidecar_match = found.kind.as_str(),
            confidence = found.confidence;
            "Sidecar paired"
        );
    }

    let (level, message) = match &report.outcome {
        Outcome::Written { .. } => (log::Level::Info, "Metadata written"),
        Outcome::Planned => (log::Level::Info, "DRY RUN: would write metadata"),
        Outcome::Skipped(SkipReason::NoSidecar | SkipReason::InvalidSidecar(_)) => {
            (log::Level::Warn, "No usable sidecar for media file")
        }
        Outcome::Skipped(SkipReason::Existing | SkipReason::Filtered) => {
            (log::Level::Debug, "Media file skipped")
        }
        Outcome::Skipped(_) => (log::Level::Info, "Media file copied without metadata"),
        Outcome::Failed(_) => (log::Level::Error, "Failed to write metadata"),
    };

    let detail = match &report.outcome {
        Outcome::Written { backend, .. } => backend.to_string(),
        Outcome::Planned => String::new(),
        Outcome::Skipped(reason) => reason.to_string(),
        Outcome::Failed(e) => e.clone(),
    };
    log::log!(
        level,
        source:% = report.source.display(),
        dest:% = report.final_path().display(),
        outcome = report.outcome.label(),
        detail:% = detail;
        "{message}"
    );
}
