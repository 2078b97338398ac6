//! In-memory EXIF block: fields grouped by the IFD they live in.
//!
//! Reading goes through kamadak-exif's `Reader`, writing through its
//! experimental `Writer`. Offset/pointer tags are dropped on read because the
//! writer synthesizes them; the IFD1 thumbnail JPEG is carried separately so it
//! survives a rewrite.

pub mod gps;
pub mod merge;
mod repair;

use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::NaiveDateTime;
use exif::{Context, Exif, Field, In, Reader, Tag, Value};

use crate::error::MetadataSerializationError;

/// Format of every EXIF date/time string.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Tags the writer derives from the layout; never stored in a block.
const SYNTHESIZED_TAGS: [Tag; 9] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
];

/// Metadata group, following the IFD a field is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Group {
    /// IFD0 (image description, camera, DateTime, ...).
    Primary,
    /// Exif sub-IFD (capture details, DateTimeOriginal, ...).
    Exif,
    Gps,
    Interop,
    /// IFD1, the embedded thumbnail.
    Thumbnail,
}

impl Group {
    pub fn of(tag: Tag, ifd_num: In) -> Self {
        if ifd_num != In::PRIMARY {
            return Group::Thumbnail;
        }
        match tag.context() {
            Context::Tiff => Group::Primary,
            Context::Exif => Group::Exif,
            Context::Gps => Group::Gps,
            Context::Interop => Group::Interop,
            _ => Group::Primary,
        }
    }
}

/// A photo's EXIF metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataBlock {
    groups: BTreeMap<Group, Vec<Field>>,
    thumbnail: Option<Vec<u8>>,
    little_endian: bool,
}

pub(crate) fn ascii_field(tag: Tag, text: &[u8]) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.to_vec()]),
    }
}

impl MetadataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a block from a parsed EXIF structure.
    pub fn from_exif(exif: &Exif) -> Self {
        let mut block = MetadataBlock {
            little_endian: exif.little_endian(),
            ..Default::default()
        };

        for field in exif.fields() {
            if SYNTHESIZED_TAGS.contains(&field.tag) {
                continue;
            }
            block.set_field(field.clone());
        }

        let offset = exif.get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL);
        let length = exif.get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL);
        if let (Some(offset), Some(length)) = (offset, length) {
            let start = offset.value.get_uint(0).unwrap_or(0) as usize;
            let len = length.value.get_uint(0).unwrap_or(0) as usize;
            block.thumbnail = exif
                .buf()
                .get(start..start.saturating_add(len))
                .map(<[u8]>::to_vec);
            if block.thumbnail.is_none() {
                tracing::debug!(start, len, "thumbnail points outside the EXIF buffer, dropping it");
            }
        }

        block
    }

    /// Parse a raw TIFF-structured EXIF stream (the APP1 payload after `Exif\0\0`).
    ///
    /// A stream the reader rejects is repaired by cutting out the broken
    /// entries and read again, so the readable fields survive. The error is
    /// returned only when nothing can be salvaged.
    pub fn from_tiff(data: Vec<u8>) -> Result<Self, exif::Error> {
        let err = match Reader::new().read_raw(data.clone()) {
            Ok(exif) => return Ok(Self::from_exif(&exif)),
            Err(err) => err,
        };
        let Some((repaired, dropped)) = repair::repair(&data) else {
            return Err(err);
        };
        let exif = Reader::new().read_raw(repaired)?;
        tracing::warn!(error = %err, dropped = ?dropped, "damaged EXIF, kept the readable fields");
        Ok(Self::from_exif(&exif))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty) && self.thumbnail.is_none()
    }

    pub fn groups(&self) -> impl Iterator<Item = Group> + '_ {
        self.groups.keys().copied()
    }

    pub fn has_group(&self, group: Group) -> bool {
        self.groups.contains_key(&group)
    }

    /// Fields of `group` in insertion order; empty if the group is absent.
    pub fn group(&self, group: Group) -> &[Field] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, tag: Tag, ifd_num: In) -> Option<&Field> {
        self.group(Group::of(tag, ifd_num))
            .iter()
            .find(|field| field.tag == tag && field.ifd_num == ifd_num)
    }

    /// Insert a field, replacing any field with the same tag in the same IFD.
    pub fn set_field(&mut self, field: Field) {
        let fields = self
            .groups
            .entry(Group::of(field.tag, field.ifd_num))
            .or_default();
        match fields
            .iter_mut()
            .find(|existing| existing.tag == field.tag && existing.ifd_num == field.ifd_num)
        {
            Some(existing) => *existing = field,
            None => fields.push(field),
        }
    }

    /// Replace a whole group. Fields are re-keyed by their own tag and IFD,
    /// so anything that does not belong to `group` lands where it belongs.
    pub fn replace_group(&mut self, group: Group, fields: Vec<Field>) {
        self.groups.remove(&group);
        for field in fields {
            self.set_field(field);
        }
    }

    pub fn thumbnail(&self) -> Option<&[u8]> {
        self.thumbnail.as_deref()
    }

    /// Capture time: DateTimeOriginal, then DateTimeDigitized, then DateTime.
    pub fn capture_time(&self) -> Option<NaiveDateTime> {
        let tags = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

        for tag in &tags {
            if let Some(Field {
                value: Value::Ascii(parts),
                ..
            }) = self.get(*tag, In::PRIMARY)
            {
                let parsed = parts
                    .first()
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .and_then(parse_exif_datetime);
                if parsed.is_some() {
                    return parsed;
                }
            }
        }

        None
    }

    /// Encode as a TIFF-structured EXIF stream, keeping the original byte order.
    pub fn to_tiff(&self) -> Result<Vec<u8>, MetadataSerializationError> {
        let mut writer = exif::experimental::Writer::new();
        for field in self.groups.values().flatten() {
            writer.push_field(field);
        }
        if let Some(thumbnail) = &self.thumbnail {
            writer.set_jpeg(thumbnail, In::THUMBNAIL);
        }

        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, self.little_endian)?;
        Ok(buf.into_inner())
    }
}

/// Parse an EXIF date/time string. Date separators `-` and `/` are accepted
/// and a trailing fraction of a second is dropped. Anything short of a full
/// date and time gives `None`.
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let (date, time) = trimmed.split_once(' ')?;
    let time = match time.split_once('.') {
        Some((whole, fraction)) if fraction.bytes().all(|b| b.is_ascii_digit()) => whole,
        _ => time,
    };
    let cleaned = format!("{} {}", date.replace(['-', '/'], ":"), time.trim_start());

    NaiveDateTime::parse_from_str(&cleaned, EXIF_DATETIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 8, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn sample_block() -> MetadataBlock {
        let mut block = MetadataBlock::new();
        block.set_field(ascii_field(Tag::Make, b"Pentax"));
        block.set_field(ascii_field(Tag::DateTime, b"2023:08:14 18:00:00"));
        block.set_field(ascii_field(Tag::DateTimeOriginal, b"2023:08:14 09:15:30"));
        block.set_field(Field {
            tag: Tag::ImageDescription,
            ifd_num: In::THUMBNAIL,
            value: Value::Ascii(vec![b"thumb".to_vec()]),
        });
        block
    }

    #[test]
    fn test_fields_are_grouped_by_ifd() {
        let block = sample_block();
        assert_eq!(block.group(Group::Primary).len(), 2);
        assert_eq!(block.group(Group::Exif).len(), 1);
        assert_eq!(block.group(Group::Thumbnail).len(), 1);
        assert!(block.group(Group::Gps).is_empty());
        assert!(!block.has_group(Group::Gps));
    }

    #[test]
    fn test_set_field_replaces_same_tag() {
        let mut block = sample_block();
        block.set_field(ascii_field(Tag::Make, b"Ricoh"));
        assert_eq!(block.group(Group::Primary).len(), 2);
        let make = block.get(Tag::Make, In::PRIMARY).unwrap();
        assert_eq!(make.display_value().to_string(), "\"Ricoh\"");
    }

    #[test]
    fn test_capture_time_prefers_original() {
        assert_eq!(sample_block().capture_time(), Some(dt(9, 15, 30)));
    }

    #[test]
    fn test_capture_time_falls_back_to_datetime() {
        let mut block = MetadataBlock::new();
        block.set_field(ascii_field(Tag::DateTime, b"2023:08:14 18:00:00"));
        assert_eq!(block.capture_time(), Some(dt(18, 0, 0)));
    }

    #[test]
    fn test_capture_time_skips_unparseable_values() {
        let mut block = MetadataBlock::new();
        block.set_field(ascii_field(Tag::DateTimeOriginal, b"    :  :     :  :  "));
        block.set_field(ascii_field(Tag::DateTimeDigitized, b"2023:08:14 07:00:01"));
        assert_eq!(block.capture_time(), Some(dt(7, 0, 1)));
    }

    #[test]
    fn test_capture_time_absent() {
        assert_eq!(MetadataBlock::new().capture_time(), None);
    }

    #[test]
    fn test_parse_exif_datetime_variants() {
        assert_eq!(parse_exif_datetime("2023:08:14 09:15:30"), Some(dt(9, 15, 30)));
        assert_eq!(parse_exif_datetime("2023-08-14 09:15:30"), Some(dt(9, 15, 30)));
        assert_eq!(parse_exif_datetime("2023:08:14 09:15:30\0"), Some(dt(9, 15, 30)));
        assert_eq!(parse_exif_datetime("garbage"), None);
    }

    #[test]
    fn test_parse_exif_datetime_needs_a_full_time() {
        assert_eq!(parse_exif_datetime("2023/08/14"), None);
        assert_eq!(parse_exif_datetime("2023:08:14"), None);
        assert_eq!(parse_exif_datetime("2023:08:14 25:00:00"), None);
        assert_eq!(parse_exif_datetime("2023:08:14 09:15"), None);
    }

    #[test]
    fn test_parse_exif_datetime_drops_fraction() {
        assert_eq!(parse_exif_datetime("2023:08:14 10:04:00.50"), Some(dt(10, 4, 0)));
        assert_eq!(parse_exif_datetime("2023:08:14 10:04:00.5x"), None);
    }

    #[test]
    fn test_capture_time_with_fraction_is_not_midnight() {
        let mut block = MetadataBlock::new();
        block.set_field(ascii_field(Tag::DateTimeOriginal, b"2023:08:14 10:04:00.50"));
        assert_eq!(block.capture_time(), Some(dt(10, 4, 0)));
    }

    #[test]
    fn test_tiff_round_trip_keeps_groups() {
        let block = sample_block();
        let tiff = block.to_tiff().unwrap();
        let decoded = MetadataBlock::from_tiff(tiff).unwrap();

        assert_eq!(decoded.group(Group::Primary).len(), 2);
        assert_eq!(decoded.capture_time(), Some(dt(9, 15, 30)));
        let thumb = decoded.get(Tag::ImageDescription, In::THUMBNAIL).unwrap();
        assert_eq!(thumb.display_value().to_string(), "\"thumb\"");
        // Pointer tags are synthesized by the writer and not stored.
        assert!(decoded.get(Tag::ExifIFDPointer, In::PRIMARY).is_none());
    }

    /// Point the value offset of `tag` in IFD0 of a big-endian stream past the end.
    fn break_value_offset(tiff: &mut [u8], tag: u16) {
        let ifd = u32::from_be_bytes(tiff[4..8].try_into().unwrap()) as usize;
        let count = u16::from_be_bytes(tiff[ifd..ifd + 2].try_into().unwrap()) as usize;
        for i in 0..count {
            let at = ifd + 2 + i * 12;
            if u16::from_be_bytes(tiff[at..at + 2].try_into().unwrap()) == tag {
                tiff[at + 8..at + 12].copy_from_slice(&0xffff_0000u32.to_be_bytes());
                return;
            }
        }
        panic!("tag {tag:#06x} not in IFD0");
    }

    #[test]
    fn test_damaged_entry_keeps_capture_time() {
        let mut tiff = sample_block().to_tiff().unwrap();
        break_value_offset(&mut tiff, Tag::Make.number());
        assert!(Reader::new().read_raw(tiff.clone()).is_err());

        let decoded = MetadataBlock::from_tiff(tiff).unwrap();
        assert_eq!(decoded.capture_time(), Some(dt(9, 15, 30)));
        assert!(decoded.get(Tag::Make, In::PRIMARY).is_none());
        assert!(decoded.get(Tag::DateTime, In::PRIMARY).is_some());
    }

    #[test]
    fn test_unsalvageable_stream_is_an_error() {
        assert!(MetadataBlock::from_tiff(b"not a tiff stream".to_vec()).is_err());
    }

    #[test]
    fn test_clone_is_deep() {
        let block = sample_block();
        let mut copy = block.clone();
        copy.set_field(ascii_field(Tag::Make, b"Other"));
        let original = block.get(Tag::Make, In::PRIMARY).unwrap();
        assert_eq!(original.display_value().to_string(), "\"Pentax\"");
    }
}
