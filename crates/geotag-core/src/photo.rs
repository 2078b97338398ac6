use chrono::NaiveDateTime;
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageEXIF};

use crate::error::PhotoError;
use crate::metadata::MetadataBlock;

const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
/// APP1 payload prefix that marks an EXIF segment.
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// One uploaded photo: its EXIF metadata plus the untouched JPEG container.
#[derive(Debug, Clone)]
pub struct PhotoRecord {
    pub name: String,
    /// DateTimeOriginal, falling back to DateTimeDigitized then DateTime.
    pub capture_time: Option<NaiveDateTime>,
    pub metadata: MetadataBlock,
    container: Bytes,
}

impl PhotoRecord {
    /// Parse a JPEG. Missing EXIF gives an empty block. Damaged EXIF keeps
    /// whatever fields are still readable; EXIF that cannot be salvaged at all
    /// is logged and treated as missing.
    pub fn from_jpeg(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PhotoError> {
        let name = name.into();
        let container = Bytes::from(bytes);
        let jpeg = Jpeg::from_bytes(container.clone())
            .map_err(|e| PhotoError::Container(e.to_string()))?;

        let metadata = match jpeg.exif() {
            Some(tiff) => MetadataBlock::from_tiff(tiff.to_vec()).unwrap_or_else(|e| {
                tracing::warn!(photo = %name, error = %e, "unreadable EXIF segment, treating as empty");
                MetadataBlock::new()
            }),
            None => MetadataBlock::new(),
        };
        let capture_time = metadata.capture_time();

        Ok(Self {
            name,
            capture_time,
            metadata,
            container,
        })
    }

    /// Original container bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.container
    }

    /// Re-encode the photo with `metadata` as its EXIF segment.
    ///
    /// The EXIF segment keeps its position (or goes right after APP0 when the
    /// photo had none); every other segment and the scan data are copied as is.
    pub fn encode(&self, metadata: &MetadataBlock) -> Result<Vec<u8>, PhotoError> {
        let tiff = metadata.to_tiff()?;
        let mut jpeg = Jpeg::from_bytes(self.container.clone())
            .map_err(|e| PhotoError::Container(e.to_string()))?;

        let mut contents = Vec::with_capacity(EXIF_PREFIX.len() + tiff.len());
        contents.extend_from_slice(EXIF_PREFIX);
        contents.extend_from_slice(&tiff);
        let segment = JpegSegment::new_with_contents(APP1, Bytes::from(contents));

        let segments = jpeg.segments_mut();
        match segments.iter().position(is_exif_segment) {
            Some(pos) => {
                segments[pos] = segment;
                // Drop any duplicate EXIF segment after the one we replaced.
                let mut index = 0;
                segments.retain(|s| {
                    index += 1;
                    index - 1 == pos || !is_exif_segment(s)
                });
            }
            None => {
                let pos = usize::from(
                    segments
                        .first()
                        .is_some_and(|s| s.marker() == APP0),
                );
                segments.insert(pos, segment);
            }
        }

        Ok(jpeg.encoder().bytes().to_vec())
    }
}

fn is_exif_segment(segment: &JpegSegment) -> bool {
    segment.marker() == APP1 && segment.contents().starts_with(EXIF_PREFIX)
}
