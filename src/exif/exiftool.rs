use anyhow::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::sidecar::MediaMetadata;

/// exiftool exits non-zero for these even though the write went through.
const MINOR_WARNINGS: &[&str] = &["looks more like a", "IFD0 pointer references", "[minor]"];

/// Handle to the external `exiftool` program.
///
/// Used for formats with no native writer (HEIC, WebP, TIFF) and as a
/// fallback when a native writer fails.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Installed version, or `None` if the program cannot be run.
    pub fn version(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .arg("-ver")
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() { None } else { Some(version) }
    }

    /// Write the metadata record into `path` in place.
    pub fn write(&self, path: &Path, meta: &MediaMetadata) -> Result<()> {
        let args = build_args(meta);
        if args.is_empty() {
            return Ok(());
        }

        let output = Command::new(&self.program)
            .args(["-m", "-overwrite_original"])
            .args(&args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    anyhow::anyhow!(
                        "{} not found; install exiftool and make sure it is on PATH",
                        self.program.display()
                    )
                } else {
                    anyhow::Error::new(e)
                        .context(format!("Failed to run {}", self.program.display()))
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !is_minor_warning(&stderr) {
            anyhow::bail!(
                "exiftool failed with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        if !stderr.trim().is_empty() {
            log::debug!("exiftool: {}", stderr.trim());
        }

        Ok(())
    }
}

/// Tag assignments for one metadata record.
fn build_args(meta: &MediaMetadata) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(ts) = meta.exif_datetime() {
        args.push(format!("-DateTimeOriginal={ts}"));
        args.push(format!("-CreateDate={ts}"));
    }

    if let Some(ref gps) = meta.location {
        let lat_ref = if gps.latitude >= 0.0 { "N" } else { "S" };
        let lon_ref = if gps.longitude >= 0.0 { "E" } else { "W" };
        args.push(format!("-GPSLatitude={}", gps.latitude.abs()));
        args.push(format!("-GPSLatitudeRef={lat_ref}"));
        args.push(format!("-GPSLongitude={}", gps.longitude.abs()));
        args.push(format!("-GPSLongitudeRef={lon_ref}"));
        if let Some(alt) = gps.altitude {
            args.push(format!("-GPSAltitude={}", alt.abs()));
            args.push(format!("-GPSAltitudeRef={}", u8::from(alt < 0.0)));
        }
    }

    if let Some(ref desc) = meta.description {
        args.push(format!("-ImageDescription={desc}"));
        args.push(format!("-XMP-dc:Description={desc}"));
    }

    args
}

fn is_minor_warning(stderr: &str) -> bool {
    MINOR_WARNINGS.iter().any(|w| stderr.contains(w))
}
