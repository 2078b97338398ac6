use exif::{Field, In, Rational, Tag, Value};

use super::MetadataBlock;
use crate::coords::{self, GeoCoordinate, Reference};
use crate::error::MalformedGpsError;

/// Best-effort read of a coordinate already embedded in `block`.
///
/// Used for display only. A partial or malformed GPS group is logged at debug
/// level and reported as `None`.
pub fn extract(block: &MetadataBlock) -> Option<GeoCoordinate> {
    match try_extract(block) {
        Ok(coordinate) => coordinate,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed GPS group");
            None
        }
    }
}

/// Strict variant of [`extract`]: `Ok(None)` when no coordinate is stored,
/// `Err` when one is stored but cannot be decoded.
pub fn try_extract(block: &MetadataBlock) -> Result<Option<GeoCoordinate>, MalformedGpsError> {
    let (Some(lat), Some(lon)) = (
        block.get(Tag::GPSLatitude, In::PRIMARY),
        block.get(Tag::GPSLongitude, In::PRIMARY),
    ) else {
        return Ok(None);
    };

    let latitude = decode_axis(
        lat,
        block.get(Tag::GPSLatitudeRef, In::PRIMARY),
        "GPSLatitude",
        "GPSLatitudeRef",
    )?;
    let longitude = decode_axis(
        lon,
        block.get(Tag::GPSLongitudeRef, In::PRIMARY),
        "GPSLongitude",
        "GPSLongitudeRef",
    )?;

    Ok(Some(GeoCoordinate::new(latitude, longitude)))
}

fn decode_axis(
    field: &Field,
    reference: Option<&Field>,
    name: &'static str,
    ref_name: &'static str,
) -> Result<f64, MalformedGpsError> {
    let reference = reference.ok_or(MalformedGpsError::MissingField(ref_name))?;
    let reference = match &reference.value {
        Value::Ascii(parts) => parts.first().and_then(|raw| Reference::from_ascii(raw)),
        _ => None,
    }
    .ok_or_else(|| MalformedGpsError::UnknownReference(reference.display_value().to_string()))?;

    let dms: [Rational; 3] = match &field.value {
        Value::Rational(parts) if parts.len() >= 3 => [parts[0], parts[1], parts[2]],
        _ => return Err(MalformedGpsError::NotRationalTriple(name)),
    };

    let value = coords::to_decimal(&dms, reference);
    if !value.is_finite() {
        return Err(MalformedGpsError::NonFinite(name));
    }
    Ok(value)
}
