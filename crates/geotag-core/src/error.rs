use thiserror::Error;

/// The track has no timestamped points, so no photo can be aligned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("track contains no timestamped points")]
pub struct EmptyTrackError;

/// Re-encoding a metadata block into an EXIF (TIFF) stream failed.
#[derive(Error, Debug)]
#[error("failed to encode metadata block: {0}")]
pub struct MetadataSerializationError(#[from] pub exif::Error);

/// Why an existing GPS group could not be decoded.
///
/// Only ever observed inside the GPS extractor, which logs and discards it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedGpsError {
    #[error("missing GPS field {0}")]
    MissingField(&'static str),

    #[error("GPS field {0} is not a rational triple")]
    NotRationalTriple(&'static str),

    #[error("unknown GPS reference {0:?}")]
    UnknownReference(String),

    #[error("GPS field {0} decodes to a non-finite value")]
    NonFinite(&'static str),
}

/// Per-photo failures. None of these abort a run.
#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("no capture timestamp")]
    MissingTimestamp,

    #[error("not a readable JPEG: {0}")]
    Container(String),

    #[error(transparent)]
    Serialization(#[from] MetadataSerializationError),
}

/// Run-level failures.
#[derive(Error, Debug)]
pub enum GeotagError {
    #[error(transparent)]
    EmptyTrack(#[from] EmptyTrackError),

    #[error("failed to parse GPX track: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("invalid track point time {0:?}")]
    TrackTime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
