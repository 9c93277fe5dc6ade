//! Raw TIFF/IFD handling for what little_exif does not serialize itself:
//! the GPS IFD, and a post-write check of which tags actually landed.

use anyhow::Result;

pub(crate) const TAG_EXIF_IFD: u16 = 0x8769;
pub(crate) const TAG_GPS_IFD: u16 = 0x8825;

const ENTRY_LEN: usize = 12;

// TIFF data formats
pub(crate) const FORMAT_BYTE: u16 = 1;
pub(crate) const FORMAT_ASCII: u16 = 2;
pub(crate) const FORMAT_RATIONAL: u16 = 5;

/// Byte order of a TIFF block, from its `II`/`MM` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub(crate) fn of(tiff: &[u8]) -> Result<Self> {
        match tiff.get(0..2) {
            Some(b"II") => Ok(Self::Little),
            Some(b"MM") => Ok(Self::Big),
            _ => anyhow::bail!("Invalid TIFF byte order"),
        }
    }

    pub(crate) fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    pub(crate) fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    fn read_u16(self, data: &[u8], offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = data.get(offset..offset + 2)?.try_into().ok()?;
        Some(match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(self, data: &[u8], offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
        Some(match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        })
    }
}

/// A raw IFD entry whose value is already encoded in the block's byte order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawIfdEntry {
    pub tag_id: u16,
    pub data_format: u16,
    pub count: u32,
    pub data: Vec<u8>,
}

fn component_size(format: u16) -> Option<usize> {
    match format {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// Location of one IFD inside a TIFF block.
struct Ifd {
    entries_start: usize,
    count: usize,
}

impl Ifd {
    fn locate(tiff: &[u8], order: ByteOrder, offset: usize) -> Option<Self> {
        let count = order.read_u16(tiff, offset)? as usize;
        let entries_start = offset + 2;
        // entries plus the next-IFD link
        if entries_start + count * ENTRY_LEN + 4 > tiff.len() {
            return None;
        }
        Some(Self { entries_start, count })
    }

    fn entry_start(&self, index: usize) -> usize {
        self.entries_start + index * ENTRY_LEN
    }

    fn tag_ids(&self, tiff: &[u8], order: ByteOrder) -> Vec<u16> {
        (0..self.count)
            .filter_map(|i| order.read_u16(tiff, self.entry_start(i)))
            .collect()
    }

    fn position(&self, tiff: &[u8], order: ByteOrder, tag_id: u16) -> Option<usize> {
        (0..self.count).find(|&i| order.read_u16(tiff, self.entry_start(i)) == Some(tag_id))
    }

    /// Offset stored in a sub-IFD pointer entry, if it lands inside the block.
    fn sub_ifd(&self, tiff: &[u8], order: ByteOrder, pointer_tag: u16) -> Option<usize> {
        let index = self.position(tiff, order, pointer_tag)?;
        let offset = order.read_u32(tiff, self.entry_start(index) + 8)? as usize;
        (offset < tiff.len()).then_some(offset)
    }

    fn entries(&self, tiff: &[u8], order: ByteOrder) -> Vec<RawIfdEntry> {
        (0..self.count)
            .filter_map(|i| read_entry(tiff, order, self.entry_start(i)))
            .collect()
    }
}

fn ifd0(tiff: &[u8], order: ByteOrder) -> Option<Ifd> {
    let offset = order.read_u32(tiff, 4)? as usize;
    Ifd::locate(tiff, order, offset)
}

fn read_entry(tiff: &[u8], order: ByteOrder, start: usize) -> Option<RawIfdEntry> {
    let tag_id = order.read_u16(tiff, start)?;
    let data_format = order.read_u16(tiff, start + 2)?;
    let count = order.read_u32(tiff, start + 4)?;
    let size = component_size(data_format)?.checked_mul(count as usize)?;
    let data = if size <= 4 {
        tiff.get(start + 8..start + 8 + size)?
    } else {
        let offset = order.read_u32(tiff, start + 8)? as usize;
        tiff.get(offset..offset.checked_add(size)?)?
    };
    Some(RawIfdEntry {
        tag_id,
        data_format,
        count,
        data: data.to_vec(),
    })
}

/// Tag IDs present in each IFD of a serialized block.
#[derive(Debug, Default)]
pub(crate) struct TagIds {
    pub ifd0: Vec<u16>,
    pub exif: Vec<u16>,
    pub gps: Vec<u16>,
}

pub(crate) fn tag_ids(tiff: &[u8]) -> Result<TagIds> {
    let order = ByteOrder::of(tiff)?;
    let Some(ifd0) = ifd0(tiff, order) else {
        anyhow::bail!("IFD0 is out of bounds");
    };
    let sub_ids = |pointer_tag| {
        ifd0.sub_ifd(tiff, order, pointer_tag)
            .and_then(|offset| Ifd::locate(tiff, order, offset))
            .map(|ifd| ifd.tag_ids(tiff, order))
            .unwrap_or_default()
    };

    Ok(TagIds {
        ifd0: ifd0.tag_ids(tiff, order),
        exif: sub_ids(TAG_EXIF_IFD),
        gps: sub_ids(TAG_GPS_IFD),
    })
}

/// The GPS IFD entries of an existing block, with that block's byte order.
pub(crate) fn read_gps_entries(tiff: &[u8]) -> Option<(ByteOrder, Vec<RawIfdEntry>)> {
    let order = ByteOrder::of(tiff).ok()?;
    let offset = ifd0(tiff, order)?.sub_ifd(tiff, order, TAG_GPS_IFD)?;
    let entries = Ifd::locate(tiff, order, offset)?.entries(tiff, order);
    (!entries.is_empty()).then_some((order, entries))
}

/// Append `entries` as the GPS IFD and point IFD0's GPSInfo entry at it.
///
/// IFD0 must already hold a GPSInfo placeholder entry. An Exif IFD pointer
/// that points at the end of the block (no Exif tags were written) gets an
/// empty IFD there first, so the two pointers never share an offset.
pub(crate) fn attach_gps_ifd(tiff: &mut Vec<u8>, entries: &[RawIfdEntry]) -> Result<()> {
    let order = ByteOrder::of(tiff)?;
    let Some(ifd0) = ifd0(tiff, order) else {
        anyhow::bail!("IFD0 is out of bounds");
    };
    let Some(gps_index) = ifd0.position(tiff, order, TAG_GPS_IFD) else {
        anyhow::bail!("IFD0 has no GPSInfo entry");
    };

    if let Some(index) = ifd0.position(tiff, order, TAG_EXIF_IFD) {
        let target = order
            .read_u32(tiff, ifd0.entry_start(index) + 8)
            .map_or(0, |v| v as usize);
        if target >= tiff.len() {
            tiff.resize(target, 0);
            tiff.extend_from_slice(&order.u16_bytes(0));
            tiff.extend_from_slice(&[0u8; 4]);
        }
    }

    if tiff.len() % 2 == 1 {
        tiff.push(0);
    }
    let start = u32::try_from(tiff.len())?;
    let slot = ifd0.entry_start(gps_index) + 8;
    tiff[slot..slot + 4].copy_from_slice(&order.u32_bytes(start));

    let ifd = encode_ifd(entries, start, order)?;
    tiff.extend_from_slice(&ifd);
    Ok(())
}

/// Serialize an IFD that will live at `start`, with its out-of-line values
/// right after the next-IFD link.
fn encode_ifd(entries: &[RawIfdEntry], start: u32, order: ByteOrder) -> Result<Vec<u8>> {
    let mut sorted: Vec<&RawIfdEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.tag_id);

    let count = u16::try_from(sorted.len())?;
    let header_len = 2 + sorted.len() * ENTRY_LEN + 4;
    let mut data_off = start + u32::try_from(header_len)?;

    let mut table = Vec::with_capacity(header_len);
    let mut values = Vec::new();
    table.extend_from_slice(&order.u16_bytes(count));

    for entry in sorted {
        table.extend_from_slice(&order.u16_bytes(entry.tag_id));
        table.extend_from_slice(&order.u16_bytes(entry.data_format));
        table.extend_from_slice(&order.u32_bytes(entry.count));
        if entry.data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            table.extend_from_slice(&inline);
        } else {
            table.extend_from_slice(&order.u32_bytes(data_off));
            values.extend_from_slice(&entry.data);
            if entry.data.len() % 2 == 1 {
                values.push(0);
            }
            data_off = start + u32::try_from(header_len + values.len())?;
        }
    }
    // no next IFD
    table.extend_from_slice(&[0u8; 4]);
    table.extend_from_slice(&values);
    Ok(table)
}
