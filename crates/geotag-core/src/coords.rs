//! Conversion between signed decimal degrees and the unsigned
//! degrees/minutes/seconds rationals EXIF stores in its GPS group.

use exif::Rational;
use serde::{Deserialize, Serialize};

/// Denominator used for the seconds component (two decimal digits).
pub const SECONDS_DENOMINATOR: u32 = 100;

/// A coordinate in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Hemisphere flag stored next to each rational triple (GPSLatitudeRef / GPSLongitudeRef).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    North,
    South,
    East,
    West,
}

impl Reference {
    pub fn for_latitude(latitude: f64) -> Self {
        if latitude >= 0.0 {
            Reference::North
        } else {
            Reference::South
        }
    }

    pub fn for_longitude(longitude: f64) -> Self {
        if longitude >= 0.0 {
            Reference::East
        } else {
            Reference::West
        }
    }

    /// Parse the ASCII flag as found in EXIF. Surrounding NULs and spaces are ignored.
    pub fn from_ascii(raw: &[u8]) -> Option<Self> {
        let trimmed: Vec<u8> = raw
            .iter()
            .copied()
            .filter(|b| *b != 0 && !b.is_ascii_whitespace())
            .collect();
        match trimmed.as_slice() {
            b"N" | b"n" => Some(Reference::North),
            b"S" | b"s" => Some(Reference::South),
            b"E" | b"e" => Some(Reference::East),
            b"W" | b"w" => Some(Reference::West),
            _ => None,
        }
    }

    pub fn as_ascii(self) -> &'static [u8] {
        match self {
            Reference::North => b"N",
            Reference::South => b"S",
            Reference::East => b"E",
            Reference::West => b"W",
        }
    }

    fn is_negative(self) -> bool {
        matches!(self, Reference::South | Reference::West)
    }
}

/// Encode the magnitude of `decimal_degrees` as `[degrees/1, minutes/1, centiseconds/100]`.
///
/// The sign is dropped; pair the result with [`Reference::for_latitude`] or
/// [`Reference::for_longitude`]. Seconds that round up to 60.00 are carried into
/// the minutes (and minutes into the degrees), so the triple is always a valid
/// DMS value.
pub fn to_rational(decimal_degrees: f64) -> [Rational; 3] {
    let magnitude = decimal_degrees.abs();
    let whole = magnitude.trunc();
    let fraction = magnitude - whole;

    let mut degrees = whole as u32;
    let mut minutes = (fraction * 60.0).trunc() as u32;
    let mut centiseconds =
        ((fraction - f64::from(minutes) / 60.0) * 3600.0 * f64::from(SECONDS_DENOMINATOR)).round() as u32;

    if centiseconds >= 60 * SECONDS_DENOMINATOR {
        centiseconds -= 60 * SECONDS_DENOMINATOR;
        minutes += 1;
    }
    if minutes >= 60 {
        minutes -= 60;
        degrees += 1;
    }

    [
        Rational { num: degrees, denom: 1 },
        Rational { num: minutes, denom: 1 },
        Rational { num: centiseconds, denom: SECONDS_DENOMINATOR },
    ]
}

/// Decode a DMS rational triple back into signed decimal degrees.
pub fn to_decimal(dms: &[Rational; 3], reference: Reference) -> f64 {
    let [degrees, minutes, seconds] = dms;
    let value = degrees.to_f64() + minutes.to_f64() / 60.0 + seconds.to_f64() / 3600.0;
    if reference.is_negative() {
        -value
    } else {
        value
    }
}
