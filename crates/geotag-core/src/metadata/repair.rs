//! Salvage for EXIF streams the strict reader rejects.
//!
//! The IFD chain is walked with the reader's own bounds rules. Entries whose
//! value lies outside the buffer and sub-IFD pointers that lead nowhere are cut
//! out of their directory, and an over-long directory is shortened to what fits.
//! Everything else keeps its bytes and offsets.

use exif::{Context, Tag};

/// IFD0 and IFD1 plus a few stray ones; the reader refuses more than this.
const MAX_IFDS: usize = 8;
const ENTRY_LEN: usize = 12;

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, buf: &[u8], at: usize) -> Option<u16> {
        let bytes: [u8; 2] = buf.get(at..at.checked_add(2)?)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(self, buf: &[u8], at: usize) -> Option<u32> {
        let bytes: [u8; 4] = buf.get(at..at.checked_add(4)?)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    fn put_u16(self, buf: &mut [u8], at: usize, value: u16) {
        let bytes = match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        buf[at..at + 2].copy_from_slice(&bytes);
    }

    fn put_u32(self, buf: &mut [u8], at: usize, value: u32) {
        let bytes = match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        buf[at..at + 4].copy_from_slice(&bytes);
    }
}

/// Bytes per unit of a TIFF field type; 0 for types the reader does not know.
fn unit_len(typ: u16) -> usize {
    match typ {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 => 4,
        5 | 10 | 12 => 8,
        _ => 0,
    }
}

fn child_context(tag: Tag) -> Option<Context> {
    match tag {
        Tag::ExifIFDPointer => Some(Context::Exif),
        Tag::GPSInfoIFDPointer => Some(Context::Gps),
        Tag::InteropIFDPointer => Some(Context::Interop),
        _ => None,
    }
}

struct Walk {
    buf: Vec<u8>,
    order: ByteOrder,
    dropped: Vec<String>,
}

/// Repair `data` so the strict reader accepts it.
///
/// Returns the patched stream and a description of everything cut out, or
/// `None` when the TIFF header itself is unusable.
pub(crate) fn repair(data: &[u8]) -> Option<(Vec<u8>, Vec<String>)> {
    let order = match data.get(..2)? {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return None,
    };
    if order.u16(data, 2)? != 42 {
        return None;
    }

    let mut walk = Walk {
        buf: data.to_vec(),
        order,
        dropped: Vec::new(),
    };

    // Position of the offset that leads to the IFD being visited.
    let mut link_at = 4;
    for ifd_num in 0..=MAX_IFDS {
        let offset = walk.order.u32(&walk.buf, link_at)? as usize;
        if offset == 0 {
            break;
        }
        if ifd_num == MAX_IFDS {
            walk.dropped.push(format!("IFD chain cut after {MAX_IFDS} directories"));
            walk.order.put_u32(&mut walk.buf, link_at, 0);
            break;
        }
        match walk.directory(offset, Context::Tiff) {
            Some(next_at) => link_at = next_at,
            None => {
                walk.dropped.push(format!("IFD{ifd_num} at {offset} is unreadable"));
                walk.order.put_u32(&mut walk.buf, link_at, 0);
                break;
            }
        }
    }

    Some((walk.buf, walk.dropped))
}

impl Walk {
    /// Repair one directory in place and return where its next-IFD offset sits.
    fn directory(&mut self, offset: usize, ctx: Context) -> Option<usize> {
        let declared = self.order.u16(&self.buf, offset)? as usize;
        let after_count = self.buf.len() - offset - 2;
        if after_count < 4 {
            return None;
        }
        // Room for the entries plus the 4-byte next-IFD offset.
        let room = (after_count - 4) / ENTRY_LEN;
        let mut count = declared;
        if count > room {
            count = room;
            self.dropped.push(format!(
                "directory at {offset} declares {declared} entries, {room} fit"
            ));
            self.order.put_u16(&mut self.buf, offset, count as u16);
            self.order.put_u32(&mut self.buf, offset + 2 + count * ENTRY_LEN, 0);
        }

        let mut i = 0;
        while i < count {
            let at = offset + 2 + i * ENTRY_LEN;
            if let Err(reason) = self.entry(at, ctx) {
                self.dropped.push(reason);
                let end = offset + 2 + count * ENTRY_LEN + 4;
                self.buf.copy_within(at + ENTRY_LEN..end, at);
                count -= 1;
                self.order.put_u16(&mut self.buf, offset, count as u16);
            } else {
                i += 1;
            }
        }

        Some(offset + 2 + count * ENTRY_LEN)
    }

    fn entry(&mut self, at: usize, ctx: Context) -> Result<(), String> {
        let read = |walk: &Self| -> Option<(u16, u16, u32)> {
            Some((
                walk.order.u16(&walk.buf, at)?,
                walk.order.u16(&walk.buf, at + 2)?,
                walk.order.u32(&walk.buf, at + 4)?,
            ))
        };
        let (raw_tag, typ, cnt) = read(self).ok_or_else(|| format!("entry at {at} is cut off"))?;
        let tag = Tag(ctx, raw_tag);

        let len = unit_len(typ)
            .checked_mul(cnt as usize)
            .ok_or_else(|| format!("{tag}: count {cnt} overflows"))?;
        if len > 4 {
            let value_at = self.order.u32(&self.buf, at + 8).unwrap_or(u32::MAX) as usize;
            if value_at.checked_add(len).map_or(true, |end| end > self.buf.len()) {
                return Err(format!("{tag}: value at {value_at} runs past the end"));
            }
        }

        let Some(child_ctx) = child_context(tag) else {
            return Ok(());
        };
        let child = match typ {
            3 => self.order.u16(&self.buf, at + 8).map(usize::from),
            4 => self.order.u32(&self.buf, at + 8).map(|v| v as usize),
            _ => None,
        }
        .filter(|_| cnt >= 1)
        .ok_or_else(|| format!("{tag}: not a valid pointer"))?;

        let next_at = self
            .directory(child, child_ctx)
            .ok_or_else(|| format!("{tag}: points at {child}, outside the stream"))?;
        if self.order.u32(&self.buf, next_at) != Some(0) {
            self.dropped.push(format!("{tag}: sub-IFD chains to another directory"));
            self.order.put_u32(&mut self.buf, next_at, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Big-endian TIFF with IFD0 at offset 8 holding `entries`.
    fn tiff(entries: &[[u8; 12]], next: u32, tail: &[u8]) -> Vec<u8> {
        let mut buf = b"MM\0\x2a\0\0\0\x08".to_vec();
        buf.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        for entry in entries {
            buf.extend_from_slice(entry);
        }
        buf.extend_from_slice(&next.to_be_bytes());
        buf.extend_from_slice(tail);
        buf
    }

    fn entry(tag: u16, typ: u16, cnt: u32, value: u32) -> [u8; 12] {
        let mut e = [0u8; 12];
        e[..2].copy_from_slice(&tag.to_be_bytes());
        e[2..4].copy_from_slice(&typ.to_be_bytes());
        e[4..8].copy_from_slice(&cnt.to_be_bytes());
        e[8..].copy_from_slice(&value.to_be_bytes());
        e
    }

    fn entry_count(buf: &[u8]) -> u16 {
        u16::from_be_bytes([buf[8], buf[9]])
    }

    #[test]
    fn test_intact_stream_is_untouched() {
        // Orientation (SHORT, inline) only.
        let data = tiff(&[entry(0x0112, 3, 1, 0x0001_0000)], 0, &[]);
        let (fixed, dropped) = repair(&data).unwrap();
        assert_eq!(fixed, data);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_out_of_range_value_is_cut() {
        let data = tiff(
            &[
                entry(0x010f, 2, 8, 0xffff_0000),
                entry(0x0112, 3, 1, 0x0001_0000),
            ],
            0,
            &[],
        );
        let (fixed, dropped) = repair(&data).unwrap();
        assert_eq!(entry_count(&fixed), 1);
        assert_eq!(&fixed[10..12], &0x0112u16.to_be_bytes());
        assert_eq!(dropped.len(), 1);
        assert!(exif::Reader::new().read_raw(fixed).is_ok());
    }

    #[test]
    fn test_dangling_sub_ifd_pointer_is_cut() {
        let data = tiff(
            &[
                entry(0x0112, 3, 1, 0x0001_0000),
                entry(0x8769, 4, 1, 0x00ff_ffff),
            ],
            0,
            &[],
        );
        assert!(exif::Reader::new().read_raw(data.clone()).is_err());
        let (fixed, _) = repair(&data).unwrap();
        assert_eq!(entry_count(&fixed), 1);
        assert!(exif::Reader::new().read_raw(fixed).is_ok());
    }

    #[test]
    fn test_over_long_directory_is_shortened() {
        let mut data = tiff(&[entry(0x0112, 3, 1, 0x0001_0000)], 0, &[]);
        data[8..10].copy_from_slice(&40u16.to_be_bytes());
        let (fixed, dropped) = repair(&data).unwrap();
        assert_eq!(entry_count(&fixed), 1);
        assert!(!dropped.is_empty());
        let exif = exif::Reader::new().read_raw(fixed).unwrap();
        assert!(exif.get_field(Tag::Orientation, exif::In::PRIMARY).is_some());
    }

    #[test]
    fn test_bad_header_is_not_salvageable() {
        assert!(repair(b"XX\0\x2a\0\0\0\x08").is_none());
        assert!(repair(b"MM").is_none());
    }
}
