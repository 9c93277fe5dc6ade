use anyhow::{Context, Result};
use mp4ameta::{Data, Fourcc, Tag};
use std::path::Path;

use crate::sidecar::{GeoPoint, MediaMetadata};

/// `©xyz`: ISO 6709 location, as written by phones and ffmpeg.
const LOCATION: Fourcc = Fourcc(*b"\xa9xyz");

/// Values written into the MP4/MOV `ilst` atoms.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ContainerValues {
    /// `©day`
    pub day: Option<String>,
    /// `©cmt`
    pub comment: Option<String>,
    /// `©xyz`
    pub location: Option<String>,
}

impl ContainerValues {
    pub(crate) fn from_metadata(meta: &MediaMetadata) -> Self {
        Self {
            day: meta
                .taken_at
                .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            comment: meta.description.clone(),
            location: meta.location.as_ref().map(iso6709),
        }
    }

    fn is_empty(&self) -> bool {
        self.day.is_none() && self.comment.is_none() && self.location.is_none()
    }
}

/// `+37.7749-122.4194+012.500/`
fn iso6709(point: &GeoPoint) -> String {
    let mut s = format!("{:+08.4}{:+09.4}", point.latitude, point.longitude);
    if let Some(alt) = point.altitude {
        s.push_str(&format!("{alt:+08.3}"));
    }
    s.push('/');
    s
}

/// Write capture time, description and location into an MP4/MOV container.
pub fn write_container(path: &Path, meta: &MediaMetadata) -> Result<()> {
    let values = ContainerValues::from_metadata(meta);
    if values.is_empty() {
        return Ok(());
    }

    let mut tag = Tag::read_from_path(path)
        .with_context(|| format!("Failed to read MP4 atoms from {}", path.display()))?;

    if let Some(day) = values.day {
        log::debug!("  ©day: {day}");
        tag.set_year(day);
    }
    if let Some(comment) = values.comment {
        tag.set_comment(comment);
    }
    if let Some(location) = values.location {
        log::debug!("  ©xyz: {location}");
        tag.set_data(LOCATION, Data::Utf8(location));
    }

    tag.write_to_path(path)
        .with_context(|| format!("Failed to write MP4 atoms to {}", path.display()))?;
    Ok(())
}
