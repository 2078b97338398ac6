//! Hour-offset arithmetic between camera-local time and the track's UTC time base.

use chrono::{NaiveDateTime, TimeDelta};

/// Largest offset, in hours, accepted from configuration.
pub const MAX_OFFSET_HOURS: i32 = 24;

/// Bring a camera-local capture time into the track's time base (UTC).
///
/// An offset of 0 means the photo clock already runs on UTC.
pub fn to_track_time_base(local_capture: NaiveDateTime, input_offset_hours: i32) -> NaiveDateTime {
    local_capture - TimeDelta::hours(i64::from(input_offset_hours))
}

/// Turn a matched track time into the local display time written back to the photo.
pub fn to_output_local(matched_track_time: NaiveDateTime, output_offset_hours: i32) -> NaiveDateTime {
    matched_track_time + TimeDelta::hours(i64::from(output_offset_hours))
}

/// Check that an offset read from configuration is within +/- [`MAX_OFFSET_HOURS`].
pub fn validate_offset(hours: i32) -> Result<i32, String> {
    if (-MAX_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&hours) {
        Ok(hours)
    } else {
        Err(format!(
            "timezone offset {hours} is outside -{MAX_OFFSET_HOURS}..={MAX_OFFSET_HOURS} hours"
        ))
    }
}
