use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use nom_exif::*;
use std::path::Path;

/// Timestamp, GPS and description already embedded in a media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedMetadata {
    /// Wall-clock capture time as written in `DateTimeOriginal`.
    pub taken_at: Option<NaiveDateTime>,
    pub description: Option<String>,
    pub has_gps: bool,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

/// Read the embedded timestamp, GPS and description from a media file.
///
/// Files without an EXIF block yield an empty record rather than an error.
pub fn read_embedded(path: &Path) -> Result<EmbeddedMetadata> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open media file")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(EmbeddedMetadata::default());
        }
    };

    // Parse GPS info before converting to Exif (consumes the iterator)
    let gps_info = iter.parse_gps_info().ok().flatten();
    let exif: Exif = iter.into();

    let mut data = EmbeddedMetadata::default();

    if let Some(val) = exif.get(ExifTag::DateTimeOriginal) {
        data.taken_at = entry_to_datetime(val);
    }

    if let Some(val) = exif.get(ExifTag::ImageDescription) {
        data.description = entry_to_string(val);
    }

    // GPS via nom-exif's built-in parser
    if let Some(gps) = gps_info {
        data.has_gps = true;
        data.gps_latitude = Some(latlng_to_decimal(&gps.latitude, gps.latitude_ref));
        data.gps_longitude = Some(latlng_to_decimal(&gps.longitude, gps.longitude_ref));
    }

    Ok(data)
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// nom-exif attaches an offset to date tags when it can; the wall-clock
/// value is what was written, so the offset is dropped.
fn entry_to_datetime(val: &EntryValue) -> Option<NaiveDateTime> {
    if let EntryValue::Time(t) = val {
        return Some(t.naive_local());
    }
    let s = entry_to_string(val)?;
    parse_datetime_text(&s)
}

fn parse_datetime_text(s: &str) -> Option<NaiveDateTime> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_local());
    }
    ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Convert a nom-exif LatLng (3 URationals: deg, min, sec) to decimal degrees.
fn latlng_to_decimal(latlng: &LatLng, reference: char) -> f64 {
    let degrees = latlng.0.0 as f64 / latlng.0.1 as f64;
    let minutes = latlng.1.0 as f64 / latlng.1.1 as f64;
    let seconds = latlng.2.0 as f64 / latlng.2.1 as f64;

    let mut coord = degrees + minutes / 60.0 + seconds / 3600.0;

    if reference == 'S' || reference == 'W' {
        coord = -coord;
    }

    coord
}
