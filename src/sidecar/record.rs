use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A Takeout supplemental-metadata JSON file.
///
/// Only the fields we write back are typed; everything else in the file is
/// ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sidecar {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_views: Option<String>,
    pub creation_time: Option<TimeInfo>,
    pub photo_taken_time: Option<TimeInfo>,
    pub geo_data: Option<GeoData>,
    pub geo_data_exif: Option<GeoData>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeInfo {
    /// Epoch seconds. Takeout writes it as a string, older exports as a number.
    pub timestamp: Option<Epoch>,
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Epoch {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoData {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub latitude_span: Option<f64>,
    pub longitude_span: Option<f64>,
}

/// A point on the globe in decimal degrees, altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// The metadata a writer embeds, normalized from a [`Sidecar`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub taken_at: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub description: Option<String>,
}

/// Read and parse a sidecar file.
pub fn load_sidecar(path: &Path) -> Result<Sidecar> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sidecar {}", path.display()))?;
    let sidecar: Sidecar = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse sidecar {}", path.display()))?;
    Ok(sidecar)
}

impl Epoch {
    pub fn seconds(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl GeoData {
    /// Takeout writes `0.0, 0.0` when it has no location.
    fn to_point(&self) -> Option<GeoPoint> {
        let latitude = self.latitude?;
        let longitude = self.longitude?;
        if latitude == 0.0 && longitude == 0.0 {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(GeoPoint {
            latitude,
            longitude,
            altitude: self.altitude.filter(|a| a.is_finite() && *a != 0.0),
        })
    }
}

impl Sidecar {
    /// Capture time in epoch seconds, if the sidecar carries a valid one.
    pub fn taken_epoch(&self) -> Option<i64> {
        self.photo_taken_time.as_ref()?.timestamp.as_ref()?.seconds()
    }

    /// Normalize into the record passed to the metadata writers.
    pub fn to_metadata(&self) -> MediaMetadata {
        let taken_at = self
            .taken_epoch()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        let location = self
            .geo_data
            .as_ref()
            .and_then(GeoData::to_point)
            .or_else(|| self.geo_data_exif.as_ref().and_then(GeoData::to_point));

        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        MediaMetadata {
            taken_at,
            location,
            description,
        }
    }
}

impl MediaMetadata {
    pub fn is_empty(&self) -> bool {
        self.taken_at.is_none() && self.location.is_none() && self.description.is_none()
    }

    /// EXIF date format, `YYYY:MM:DD HH:MM:SS` in UTC.
    pub fn exif_datetime(&self) -> Option<String> {
        self.taken_at
            .map(|t| t.format("%Y:%m:%d %H:%M:%S").to_string())
    }
}
