pub mod align;
pub mod coords;
pub mod error;
pub mod geojson;
pub mod metadata;
pub mod photo;
pub mod scan;
pub mod timezone;
pub mod track;
pub mod writer;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use coords::GeoCoordinate;
pub use error::{EmptyTrackError, GeotagError, MetadataSerializationError, PhotoError};
pub use metadata::MetadataBlock;
pub use photo::PhotoRecord;
pub use track::{Track, TrackPoint};

use metadata::{gps, merge};
use scan::PhotoSource;

/// Offset assumed for both camera clock and rewritten timestamps unless told otherwise.
pub const DEFAULT_OFFSET_HOURS: i32 = 8;

fn default_offset() -> i32 {
    DEFAULT_OFFSET_HOURS
}

fn default_true() -> bool {
    true
}

/// Per-photo alignment settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeotagOptions {
    /// Hours the camera clock runs ahead of UTC. 0 when photos are already UTC.
    pub input_offset_hours: i32,
    /// Hours added to the matched track time when rewriting timestamps.
    pub output_offset_hours: i32,
    /// Overwrite the photo's date/time fields with the matched track time.
    pub rewrite_timestamp: bool,
}

impl Default for GeotagOptions {
    fn default() -> Self {
        Self {
            input_offset_hours: DEFAULT_OFFSET_HOURS,
            output_offset_hours: DEFAULT_OFFSET_HOURS,
            rewrite_timestamp: false,
        }
    }
}

/// A photo that was matched and re-encoded.
#[derive(Debug, Clone)]
pub struct GeotaggedPhoto {
    pub name: String,
    pub coordinate: GeoCoordinate,
    /// UTC time of the matched track point.
    pub track_time: NaiveDateTime,
    /// Coordinate the photo carried before, if any could be read.
    pub original_coordinate: Option<GeoCoordinate>,
    pub bytes: Vec<u8>,
}

/// A photo left out of the output, with the reason shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoIssue {
    pub name: String,
    pub reason: String,
}

impl std::fmt::Display for PhotoIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Outcome of the per-photo loop, each list in input order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub geotagged: Vec<GeotaggedPhoto>,
    /// Photos without a capture timestamp.
    pub skipped: Vec<PhotoIssue>,
    /// Photos that could not be read or re-encoded.
    pub failed: Vec<PhotoIssue>,
}

impl RunReport {
    fn record(&mut self, name: String, result: Result<GeotaggedPhoto, PhotoError>) {
        match result {
            Ok(photo) => self.geotagged.push(photo),
            Err(e @ PhotoError::MissingTimestamp) => self.skipped.push(PhotoIssue {
                name,
                reason: e.to_string(),
            }),
            Err(e) => self.failed.push(PhotoIssue {
                name,
                reason: e.to_string(),
            }),
        }
    }

    fn from_results(results: Vec<(String, Result<GeotaggedPhoto, PhotoError>)>) -> Self {
        let mut report = RunReport::default();
        for (name, result) in results {
            report.record(name, result);
        }
        report
    }
}

/// Match one photo against the track and embed the result.
///
/// A photo without a capture time is rejected with
/// [`PhotoError::MissingTimestamp`] before its metadata is touched.
pub fn geotag_photo(
    record: &PhotoRecord,
    track: &Track,
    options: &GeotagOptions,
) -> Result<GeotaggedPhoto, PhotoError> {
    let capture_time = record.capture_time.ok_or(PhotoError::MissingTimestamp)?;
    let utc = timezone::to_track_time_base(capture_time, options.input_offset_hours);
    let matched = track.closest(utc);

    let stamped;
    let base = if options.rewrite_timestamp {
        let local = timezone::to_output_local(matched.timestamp, options.output_offset_hours);
        stamped = merge::with_timestamp(&record.metadata, local);
        &stamped
    } else {
        &record.metadata
    };
    let coordinate = matched.coordinate();
    let metadata = merge::with_gps(base, coordinate);

    Ok(GeotaggedPhoto {
        name: record.name.clone(),
        coordinate,
        track_time: matched.timestamp,
        original_coordinate: gps::extract(&record.metadata),
        bytes: record.encode(&metadata)?,
    })
}

/// Geotag already parsed photos. Photos are independent, so they are
/// processed in parallel; the report keeps input order.
pub fn geotag_records(
    track: &Track,
    records: &[PhotoRecord],
    options: &GeotagOptions,
    progress: &ThrottledProgress,
) -> RunReport {
    let total = records.len() as u64;
    let counter = AtomicU64::new(0);
    let results = records
        .par_iter()
        .map(|record| {
            let result = geotag_photo(record, track, options);
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("geotag", current, total, "Geotagging photos");
            (record.name.clone(), result)
        })
        .collect();
    RunReport::from_results(results)
}

fn geotag_sources(
    track: &Track,
    sources: Vec<PhotoSource>,
    options: &GeotagOptions,
    progress: &ThrottledProgress,
) -> RunReport {
    let total = sources.len() as u64;
    let counter = AtomicU64::new(0);
    let results = sources
        .into_par_iter()
        .map(|source| {
            let result = PhotoRecord::from_jpeg(source.name.clone(), source.bytes)
                .and_then(|record| geotag_photo(&record, track, options));
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("geotag", current, total, "Geotagging photos");
            (source.name, result)
        })
        .collect();
    RunReport::from_results(results)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// GPX track file.
    pub track: PathBuf,
    /// Photo files, directories or ZIP archives.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    #[serde(default = "default_offset")]
    pub input_offset_hours: i32,
    /// Photo clocks already run on UTC; overrides `input_offset_hours`.
    #[serde(default)]
    pub photos_in_utc: bool,
    #[serde(default = "default_offset")]
    pub output_offset_hours: i32,
    #[serde(default)]
    pub rewrite_timestamp: bool,
    #[serde(default)]
    pub zip_output: bool,
    #[serde(default = "default_true")]
    pub geojson: bool,
    #[serde(default)]
    pub force: bool,
}

impl ProcessOptions {
    pub fn geotag_options(&self) -> GeotagOptions {
        GeotagOptions {
            input_offset_hours: if self.photos_in_utc {
                0
            } else {
                self.input_offset_hours
            },
            output_offset_hours: self.output_offset_hours,
            rewrite_timestamp: self.rewrite_timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pub total_photos: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// One `"<name>: <reason>"` line per skipped or failed photo.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Type alias for progress callback. The lifetime lets callers pass closures
/// that borrow local state such as a progress bar.
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the full pipeline: load the track, collect photos, geotag them and
/// write the results.
///
/// Fails before any photo is read when the track has no timestamped point.
/// Per-photo problems never fail the run; they are returned as warnings.
pub fn process(
    options: &ProcessOptions,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);
    let geotag_options = options.geotag_options();
    for offset in [geotag_options.input_offset_hours, geotag_options.output_offset_hours] {
        timezone::validate_offset(offset).map_err(anyhow::Error::msg)?;
    }

    // Stage 1: track
    let file = File::open(&options.track)
        .with_context(|| format!("cannot open track {}", options.track.display()))?;
    let data = track::load_gpx(BufReader::new(file))
        .with_context(|| format!("cannot read track {}", options.track.display()))?;
    let trail = data.trail;
    let track = Track::new(data.points)?;
    tracing::info!(points = track.len(), "loaded track");

    // Stage 2: photos
    let sources = scan::collect_photos(&options.inputs, &tp)?;
    let total_photos = sources.len() as u64;
    tracing::info!(photos = total_photos, "collected photos");

    // Stage 3: align and embed
    let report = geotag_sources(&track, sources, &geotag_options, &tp);
    for issue in &report.skipped {
        tracing::warn!(photo = %issue.name, reason = %issue.reason, "skipped");
    }
    for issue in &report.failed {
        tracing::warn!(photo = %issue.name, reason = %issue.reason, "failed");
    }

    // Stage 4: output
    std::fs::create_dir_all(&options.output)?;
    if !report.geotagged.is_empty() {
        writer::write_output(
            &report.geotagged,
            &options.output,
            options.zip_output,
            options.force,
            &tp,
        )?;
    }
    if options.geojson {
        let path = options.output.join(geojson::GEOJSON_FILE_NAME);
        geojson::write_geojson(&path, &trail, &report.geotagged)?;
    }

    Ok(ProcessResult {
        total_photos,
        processed: report.geotagged.len() as u64,
        skipped: report.skipped.len() as u64,
        failed: report.failed.len() as u64,
        warnings: report
            .skipped
            .iter()
            .chain(&report.failed)
            .map(ToString::to_string)
            .collect(),
    })
}
