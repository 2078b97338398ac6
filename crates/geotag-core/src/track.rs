use std::io::Read;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::align;
use crate::coords::GeoCoordinate;
use crate::error::{EmptyTrackError, GeotagError};

/// One timestamped position from the GPS logger. Timestamps are naive UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
}

impl TrackPoint {
    pub fn coordinate(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.latitude, self.longitude)
    }
}

/// Everything read from a track file.
#[derive(Debug, Clone, Default)]
pub struct TrackData {
    /// Timestamped points in file order (tracks, then segments, then points).
    pub points: Vec<TrackPoint>,
    /// Every position in file order as `(lat, lon)`, including untimed points.
    pub trail: Vec<(f64, f64)>,
}

/// Parse a GPX document, flattening all tracks and segments in file order.
pub fn load_gpx<R: Read>(reader: R) -> Result<TrackData, GeotagError> {
    let gpx = gpx::read(reader)?;
    let mut data = TrackData::default();
    let mut untimed = 0usize;

    for track in &gpx.tracks {
        for segment in &track.segments {
            for waypoint in &segment.points {
                let position = waypoint.point();
                let (latitude, longitude) = (position.y(), position.x());
                data.trail.push((latitude, longitude));

                let Some(time) = &waypoint.time else {
                    untimed += 1;
                    continue;
                };
                let iso = time.format()?;
                let timestamp = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|_| GeotagError::TrackTime(iso.clone()))?
                    .naive_utc();
                data.points.push(TrackPoint {
                    timestamp,
                    latitude,
                    longitude,
                });
            }
        }
    }

    if untimed > 0 {
        tracing::debug!(untimed, "track points without a time were left out of alignment");
    }
    Ok(data)
}

/// A track known to hold at least one point.
#[derive(Debug, Clone)]
pub struct Track {
    points: Vec<TrackPoint>,
}

impl Track {
    pub fn new(points: Vec<TrackPoint>) -> Result<Self, EmptyTrackError> {
        if points.is_empty() {
            return Err(EmptyTrackError);
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closest point in time to `query` (see [`align::closest`]).
    pub fn closest(&self, query: NaiveDateTime) -> &TrackPoint {
        // Non-empty by construction.
        match align::closest(query, &self.points) {
            Ok(point) => point,
            Err(EmptyTrackError) => unreachable!("Track is never empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="geotag-tests" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Morning walk</name>
    <trkseg>
      <trkpt lat="3.139000" lon="101.686900"><ele>40.0</ele><time>2024-05-01T02:00:00Z</time></trkpt>
      <trkpt lat="3.140000" lon="101.687900"><time>2024-05-01T02:05:00Z</time></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="3.141000" lon="101.688900"></trkpt>
      <trkpt lat="-3.142000" lon="-101.689900"><time>2024-05-01T02:10:30Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>
"#;

    fn utc(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_load_gpx_flattens_segments_in_order() {
        let data = load_gpx(SAMPLE_GPX.as_bytes()).unwrap();
        assert_eq!(data.points.len(), 3);
        assert_eq!(data.points[0].timestamp, utc(2, 0, 0));
        assert_eq!(data.points[1].timestamp, utc(2, 5, 0));
        assert_eq!(data.points[2].timestamp, utc(2, 10, 30));
        assert!((data.points[2].latitude + 3.142).abs() < 1e-9);
        assert!((data.points[2].longitude + 101.6899).abs() < 1e-9);
    }

    #[test]
    fn test_trail_keeps_untimed_points() {
        let data = load_gpx(SAMPLE_GPX.as_bytes()).unwrap();
        assert_eq!(data.trail.len(), 4);
        assert!((data.trail[2].0 - 3.141).abs() < 1e-9);
    }

    #[test]
    fn test_load_gpx_rejects_garbage() {
        assert!(load_gpx("not xml at all".as_bytes()).is_err());
    }

    #[test]
    fn test_gpx_without_tracks_gives_empty_track() {
        let gpx = r#"<?xml version="1.0"?><gpx version="1.1" creator="t" xmlns="http://www.topografix.com/GPX/1/1"></gpx>"#;
        let data = load_gpx(gpx.as_bytes()).unwrap();
        assert!(data.points.is_empty());
        assert_eq!(Track::new(data.points).unwrap_err(), EmptyTrackError);
    }

    #[test]
    fn test_track_closest() {
        let data = load_gpx(SAMPLE_GPX.as_bytes()).unwrap();
        let track = Track::new(data.points).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.closest(utc(2, 4, 0)).timestamp, utc(2, 5, 0));
    }
}
