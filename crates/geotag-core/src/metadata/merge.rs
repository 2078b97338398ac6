//! Pure merge steps. Each returns a new block and leaves its input untouched.

use chrono::NaiveDateTime;
use exif::{Field, In, Tag, Value};

use super::{ascii_field, Group, MetadataBlock, EXIF_DATETIME_FORMAT};
use crate::coords::{self, GeoCoordinate, Reference};

/// Copy of `block` whose GPS group holds exactly the four fields describing
/// `coordinate`. Any previous GPS field is dropped; other groups are kept as is.
pub fn with_gps(block: &MetadataBlock, coordinate: GeoCoordinate) -> MetadataBlock {
    let mut merged = block.clone();
    merged.replace_group(Group::Gps, gps_fields(coordinate));
    merged
}

/// Copy of `block` with DateTimeOriginal, DateTimeDigitized and DateTime all
/// set to `local_time`.
pub fn with_timestamp(block: &MetadataBlock, local_time: NaiveDateTime) -> MetadataBlock {
    let stamp = local_time.format(EXIF_DATETIME_FORMAT).to_string();
    let mut merged = block.clone();
    for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime] {
        merged.set_field(ascii_field(tag, stamp.as_bytes()));
    }
    merged
}

fn gps_fields(coordinate: GeoCoordinate) -> Vec<Field> {
    let rational = |tag, degrees: f64| Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(coords::to_rational(degrees).to_vec()),
    };

    vec![
        ascii_field(
            Tag::GPSLatitudeRef,
            Reference::for_latitude(coordinate.latitude).as_ascii(),
        ),
        rational(Tag::GPSLatitude, coordinate.latitude),
        ascii_field(
            Tag::GPSLongitudeRef,
            Reference::for_longitude(coordinate.longitude).as_ascii(),
        ),
        rational(Tag::GPSLongitude, coordinate.longitude),
    ]
}
