use anyhow::{Context, Result};
use img_parts::Bytes;
use img_parts::ImageEXIF;
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::path::Path;

use super::tiff::{self, ByteOrder, FORMAT_ASCII, FORMAT_BYTE, FORMAT_RATIONAL, RawIfdEntry};
use crate::sidecar::{GeoPoint, MediaMetadata};

// GPS IFD tag IDs (little_exif 0.4 has no typed GPS tags)
const TAG_GPS_VERSION_ID: u16 = 0x0000;
const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
const TAG_GPS_LATITUDE: u16 = 0x0002;
const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
const TAG_GPS_LONGITUDE: u16 = 0x0004;
const TAG_GPS_ALTITUDE_REF: u16 = 0x0005;
const TAG_GPS_ALTITUDE: u16 = 0x0006;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

const GPS_SECONDS_SCALE: u32 = 10_000;

/// Encode rationals as raw bytes, 8 bytes each.
fn encode_rationals(values: &[(u32, u32)], order: ByteOrder) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for &(num, den) in values {
        bytes.extend_from_slice(&order.u32_bytes(num));
        bytes.extend_from_slice(&order.u32_bytes(den));
    }
    bytes
}

/// Split decimal degrees into (degrees, minutes, seconds × 10000).
fn to_dms(value: f64) -> (u32, u32, u32) {
    let abs = value.abs();
    let degrees = abs.floor() as u32;
    let minutes_f = (abs - degrees as f64) * 60.0;
    let minutes = minutes_f.floor() as u32;
    let seconds = ((minutes_f - minutes as f64) * 60.0 * GPS_SECONDS_SCALE as f64).round() as u32;
    (degrees, minutes, seconds.min(60 * GPS_SECONDS_SCALE - 1))
}

/// Load existing EXIF metadata from a file path using little_exif.
/// Returns None if it can't parse (instead of losing data).
fn load_existing_metadata(path: &Path) -> Option<Metadata> {
    let path_owned = path.to_path_buf();
    // Workers share the process-wide panic hook, so it is left in place and
    // a little_exif panic only costs a line on stderr.
    let result = std::panic::catch_unwind(move || Metadata::new_from_path(&path_owned));

    match result {
        Ok(Ok(m)) => {
            // Check if little_exif actually loaded any tags
            if m.data().is_empty() {
                log::debug!("little_exif loaded empty metadata");
                None
            } else {
                log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
                Some(m)
            }
        }
        Ok(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            None
        }
        Err(_) => {
            log::debug!("little_exif panicked parsing EXIF");
            None
        }
    }
}

/// Build the IFD0/Exif IFD tags for a metadata record. GPS goes into its
/// own IFD, see [`gps_entries`].
///
/// `user_comment` adds the description as `UserComment` too (JPEG only;
/// PNG readers generally ignore it).
pub(crate) fn build_tags(meta: &MediaMetadata, user_comment: bool) -> Vec<ExifTag> {
    let mut tags = Vec::new();

    if let Some(ts) = meta.exif_datetime() {
        tags.push(ExifTag::ModifyDate(ts.clone()));
        tags.push(ExifTag::DateTimeOriginal(ts.clone()));
        tags.push(ExifTag::CreateDate(ts));
    }

    if let Some(ref desc) = meta.description {
        tags.push(ExifTag::ImageDescription(desc.clone()));
        if user_comment && desc.is_ascii() {
            let mut comment_bytes = b"ASCII\0\0\0".to_vec();
            comment_bytes.extend_from_slice(desc.as_bytes());
            tags.push(ExifTag::UserComment(comment_bytes));
        }
    }

    tags
}

/// Merge tags into a little_exif metadata block and return the raw TIFF
/// data with the GPS IFD attached.
///
/// Without a new location, a GPS IFD found in `existing` is carried over.
fn to_tiff_data(
    mut metadata: Metadata,
    tags: &[ExifTag],
    location: Option<&GeoPoint>,
    existing: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let order = match metadata.get_endian() {
        Endian::Little => ByteOrder::Little,
        Endian::Big => ByteOrder::Big,
    };
    let gps = match location {
        Some(point) => Some(gps_entries(point, order)),
        None => existing
            .and_then(tiff::read_gps_entries)
            .filter(|(kept_order, _)| *kept_order == order)
            .map(|(_, entries)| entries),
    };

    for tag in tags {
        metadata.set_tag(tag.clone());
    }
    if gps.is_some() {
        metadata.set_tag(ExifTag::GPSInfo(vec![0]));
    }

    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        anyhow::bail!("little_exif produced an empty EXIF block");
    }
    let mut tiff_data = exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec();
    if let Some(ref entries) = gps {
        tiff::attach_gps_ifd(&mut tiff_data, entries)?;
    }

    verify_tags(&tiff_data, tags, location.is_some())?;
    Ok(tiff_data)
}

/// Fail when a requested tag is absent from the serialized block.
fn verify_tags(tiff_data: &[u8], tags: &[ExifTag], location: bool) -> Result<()> {
    let ids = tiff::tag_ids(tiff_data)?;
    for tag in tags {
        let id = tag.as_u16();
        let present = match tag.get_group() {
            ExifTagGroup::ExifIFD => ids.exif.contains(&id),
            _ => ids.ifd0.contains(&id),
        };
        if !present {
            anyhow::bail!("EXIF block is missing tag 0x{id:04X}");
        }
    }
    if location
        && !(ids.gps.contains(&TAG_GPS_LATITUDE) && ids.gps.contains(&TAG_GPS_LONGITUDE))
    {
        anyhow::bail!("EXIF block is missing GPS coordinates");
    }
    Ok(())
}

/// Write timestamp, GPS and description into a JPEG, preserving all other data.
///
/// Strategy:
/// 1. Read the entire JPEG with img-parts (preserves all segments)
/// 2. Load existing EXIF with little_exif and merge the new tags
/// 3. Write back via img-parts (only the APP1 EXIF segment changes)
///
/// Existing EXIF that little_exif cannot parse is never dropped: the write
/// fails and the caller may route the file to exiftool instead.
pub fn write_jpeg(path: &Path, meta: &MediaMetadata) -> Result<()> {
    if meta.is_empty() {
        return Ok(());
    }
    let tags = build_tags(meta, true);

    let file_bytes = std::fs::read(path).context("Failed to read image file")?;

    // Parse JPEG structure with img-parts (preserves all segments)
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    // Remember where the EXIF segment was originally positioned
    let orig_exif_pos = find_exif_segment_pos(&jpeg);
    let original_exif = jpeg.exif().unwrap_or_default();

    let base = match load_existing_metadata(path) {
        Some(metadata) => {
            log::debug!("little_exif parsed existing EXIF, using merge strategy");
            metadata
        }
        None if original_exif.is_empty() => Metadata::new(),
        None => anyhow::bail!(
            "Existing EXIF block ({} bytes) could not be parsed",
            original_exif.len()
        ),
    };
    let existing = (!original_exif.is_empty()).then_some(&original_exif[..]);
    let tiff_data = to_tiff_data(base, &tags, meta.location.as_ref(), existing)?;

    // Write the new EXIF via set_exif (removes old, inserts at pos 3)
    jpeg.set_exif(Some(Bytes::from(tiff_data)));

    // set_exif() inserts at position 3, which may be after XMP APP1.
    // Move the EXIF segment back to its original position so EXIF comes
    // before XMP (required for many EXIF parsers).
    if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
        let target_pos = orig_exif_pos.unwrap_or(1); // default: right after APP0
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    let output = jpeg.encoder().bytes();
    std::fs::write(path, &output).context("Failed to write JPEG file")?;

    Ok(())
}

/// Write timestamp, GPS and description into a PNG `eXIf` chunk.
///
/// Existing EXIF is merged when little_exif can read it; otherwise the
/// chunk is rebuilt from the sidecar values alone.
pub fn write_png(path: &Path, meta: &MediaMetadata) -> Result<()> {
    if meta.is_empty() {
        return Ok(());
    }
    let tags = build_tags(meta, false);

    let file_bytes = std::fs::read(path).context("Failed to read image file")?;
    let mut png = Png::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse PNG: {e}"))?;

    let original_exif = png.exif();
    let base = match load_existing_metadata(path) {
        Some(metadata) => metadata,
        None => {
            if original_exif.is_some() {
                log::debug!("Replacing unreadable eXIf chunk in {}", path.display());
            }
            Metadata::new()
        }
    };
    let tiff_data = to_tiff_data(base, &tags, meta.location.as_ref(), original_exif.as_deref())?;
    png.set_exif(Some(Bytes::from(tiff_data)));

    let output = png.encoder().bytes();
    std::fs::write(path, &output).context("Failed to write PNG file")?;

    Ok(())
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

/// GPS IFD entries for a point: version, N/S and E/W references, DMS
/// rationals, and altitude when known.
fn gps_entries(gps: &GeoPoint, order: ByteOrder) -> Vec<RawIfdEntry> {
    let lat_ref = if gps.latitude >= 0.0 { b"N\0" } else { b"S\0" };
    let lon_ref = if gps.longitude >= 0.0 { b"E\0" } else { b"W\0" };
    let dms = |value: f64| {
        let (deg, min, sec) = to_dms(value);
        encode_rationals(&[(deg, 1), (min, 1), (sec, GPS_SECONDS_SCALE)], order)
    };

    let mut entries = vec![
        RawIfdEntry {
            tag_id: TAG_GPS_VERSION_ID,
            data_format: FORMAT_BYTE,
            count: 4,
            data: vec![2, 3, 0, 0],
        },
        RawIfdEntry {
            tag_id: TAG_GPS_LATITUDE_REF,
            data_format: FORMAT_ASCII,
            count: 2,
            data: lat_ref.to_vec(),
        },
        RawIfdEntry {
            tag_id: TAG_GPS_LATITUDE,
            data_format: FORMAT_RATIONAL,
            count: 3,
            data: dms(gps.latitude),
        },
        RawIfdEntry {
            tag_id: TAG_GPS_LONGITUDE_REF,
            data_format: FORMAT_ASCII,
            count: 2,
            data: lon_ref.to_vec(),
        },
        RawIfdEntry {
            tag_id: TAG_GPS_LONGITUDE,
            data_format: FORMAT_RATIONAL,
            count: 3,
            data: dms(gps.longitude),
        },
    ];

    if let Some(alt) = gps.altitude {
        let centimeters = (alt.abs() * 100.0).round() as u32;
        entries.push(RawIfdEntry {
            tag_id: TAG_GPS_ALTITUDE_REF,
            data_format: FORMAT_BYTE,
            count: 1,
            data: vec![u8::from(alt < 0.0)],
        });
        entries.push(RawIfdEntry {
            tag_id: TAG_GPS_ALTITUDE,
            data_format: FORMAT_RATIONAL,
            count: 1,
            data: encode_rationals(&[(centimeters, 100)], order),
        });
    }

    entries
}
