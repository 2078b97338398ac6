use chrono::NaiveDateTime;

use crate::error::EmptyTrackError;
use crate::track::TrackPoint;

/// Return the track point whose timestamp is closest to `query`.
///
/// Points are scanned in order and ties keep the earliest point, so the result
/// does not depend on whether the track is sorted.
pub fn closest(query: NaiveDateTime, points: &[TrackPoint]) -> Result<&TrackPoint, EmptyTrackError> {
    let mut iter = points.iter();
    let mut best = iter.next().ok_or(EmptyTrackError)?;
    let mut best_delta = (best.timestamp - query).abs();

    for point in iter {
        let delta = (point.timestamp - query).abs();
        if delta < best_delta {
            best = point;
            best_delta = delta;
        }
    }

    Ok(best)
}
