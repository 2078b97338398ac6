use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Datelike, NaiveDateTime, Timelike};
use rayon::prelude::*;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{GeotaggedPhoto, ThrottledProgress};

/// Archive name used with `--zip`.
pub const ZIP_FILE_NAME: &str = "geotagged_images.zip";

/// Result of the write phase.
#[derive(Debug)]
pub struct WriteResult {
    /// Where each photo went, in input order. In ZIP mode these are entry
    /// names inside the archive.
    pub assignments: Vec<PathBuf>,
    pub files_written: u64,
}

/// File names already present directly under `dir`.
fn scan_existing_names(dir: &Path) -> HashSet<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}

fn numbered(name: &str, counter: u32) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}({}).{}", stem, counter, ext),
        None => format!("{}({})", stem, counter),
    }
}

/// Give every name a unique slot: the first use keeps its name, later uses
/// and names in `taken` become `stem(1).ext`, `stem(2).ext`, ...
fn assign_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
    taken: &HashSet<String>,
) -> Vec<String> {
    // Counters per base name avoid rescanning numbers already handed out
    let mut name_counters: HashMap<&str, u32> = HashMap::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut assigned = Vec::new();

    for name in names {
        let counter = name_counters.entry(name).or_insert(0);
        let dest = if *counter == 0 && !used.contains(name) && !taken.contains(name) {
            name.to_string()
        } else {
            loop {
                *counter += 1;
                let candidate = numbered(name, *counter);
                if !used.contains(&candidate) && !taken.contains(&candidate) {
                    break candidate;
                }
            }
        };
        used.insert(dest.clone());
        assigned.push(dest);
    }

    assigned
}

/// Write processed photos under `output_dir`, either as plain files or
/// bundled into [`ZIP_FILE_NAME`].
///
/// Without `force`, files already in `output_dir` are left alone and new
/// ones get numbered names instead.
pub fn write_output(
    photos: &[GeotaggedPhoto],
    output_dir: &Path,
    zip_output: bool,
    force: bool,
    progress: &ThrottledProgress,
) -> anyhow::Result<WriteResult> {
    fs::create_dir_all(output_dir)?;

    let existing = if force {
        HashSet::new()
    } else {
        scan_existing_names(output_dir)
    };

    if zip_output {
        let archive_name = assign_names([ZIP_FILE_NAME], &existing).remove(0);
        let archive_path = output_dir.join(archive_name);
        let entries = assign_names(photos.iter().map(|p| p.name.as_str()), &HashSet::new());
        write_zip(photos, &entries, &archive_path, progress)?;
        tracing::info!(path = %archive_path.display(), photos = photos.len(), "wrote archive");
        return Ok(WriteResult {
            assignments: entries.into_iter().map(PathBuf::from).collect(),
            files_written: photos.len() as u64,
        });
    }

    let assignments: Vec<PathBuf> = assign_names(photos.iter().map(|p| p.name.as_str()), &existing)
        .into_iter()
        .map(|name| output_dir.join(name))
        .collect();

    let total = photos.len() as u64;
    let write_counter = AtomicU64::new(0);
    photos
        .par_iter()
        .zip(assignments.par_iter())
        .try_for_each(|(photo, dest)| -> anyhow::Result<()> {
            let mut out_file = io::BufWriter::new(File::create(dest)?);
            out_file.write_all(&photo.bytes)?;
            out_file.flush()?;
            drop(out_file);

            let ft = filetime::FileTime::from_unix_time(photo.track_time.and_utc().timestamp(), 0);
            if let Err(e) = filetime::set_file_mtime(dest, ft) {
                tracing::debug!(path = %dest.display(), error = %e, "could not set mtime");
            }

            let current = write_counter.fetch_add(1, Ordering::Relaxed);
            progress.report("write", current, total, "Writing files");
            Ok(())
        })?;

    tracing::info!(dir = %output_dir.display(), photos = photos.len(), "wrote photos");
    Ok(WriteResult {
        assignments,
        files_written: total,
    })
}

fn zip_time(t: NaiveDateTime) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(t.year()).ok()?,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .ok()
}

fn write_zip(
    photos: &[GeotaggedPhoto],
    entries: &[String],
    archive_path: &Path,
    progress: &ThrottledProgress,
) -> anyhow::Result<()> {
    let mut writer = ZipWriter::new(io::BufWriter::new(File::create(archive_path)?));
    let total = photos.len() as u64;

    for (i, (photo, entry)) in photos.iter().zip(entries).enumerate() {
        // JPEG data does not compress further
        let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        if let Some(mtime) = zip_time(photo.track_time) {
            options = options.last_modified_time(mtime);
        }
        writer.start_file(entry.as_str(), options)?;
        writer.write_all(&photo.bytes)?;
        progress.report("write", i as u64, total, "Packing archive");
    }

    writer.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::GeoCoordinate;
    use chrono::NaiveDate;
    use std::io::Read;

    fn photo(name: &str, bytes: &[u8]) -> GeotaggedPhoto {
        GeotaggedPhoto {
            name: name.to_string(),
            coordinate: GeoCoordinate::new(1.0, 2.0),
            track_time: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(2, 5, 0)
                .unwrap(),
            original_coordinate: None,
            bytes: bytes.to_vec(),
        }
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_assign_names_numbers_duplicates() {
        let taken = HashSet::from(["b.jpg".to_string()]);
        let assigned = assign_names(["a.jpg", "a.jpg", "b.jpg", "a(1).jpg", "a.jpg", "raw"], &taken);
        assert_eq!(
            assigned,
            ["a.jpg", "a(1).jpg", "b(1).jpg", "a(1)(1).jpg", "a(2).jpg", "raw"]
        );
    }

    #[test]
    fn test_write_directory_with_collisions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"old").unwrap();

        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        let photos = [photo("a.jpg", b"first"), photo("a.jpg", b"second")];
        let result = write_output(&photos, dir.path(), false, false, &ThrottledProgress::new(&cb)).unwrap();

        assert_eq!(result.files_written, 2);
        assert_eq!(names(&result.assignments), ["a(1).jpg", "a(2).jpg"]);
        assert_eq!(fs::read(dir.path().join("a.jpg")).unwrap(), b"old");
        assert_eq!(fs::read(dir.path().join("a(2).jpg")).unwrap(), b"second");
    }

    #[test]
    fn test_force_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"old").unwrap();

        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        let photos = [photo("a.jpg", b"new")];
        let result = write_output(&photos, dir.path(), false, true, &ThrottledProgress::new(&cb)).unwrap();

        assert_eq!(names(&result.assignments), ["a.jpg"]);
        assert_eq!(fs::read(dir.path().join("a.jpg")).unwrap(), b"new");
    }

    #[test]
    fn test_mtime_is_track_time() {
        let dir = tempfile::tempdir().unwrap();
        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        let photos = [photo("a.jpg", b"x")];
        write_output(&photos, dir.path(), false, false, &ThrottledProgress::new(&cb)).unwrap();

        let meta = fs::metadata(dir.path().join("a.jpg")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), photos[0].track_time.and_utc().timestamp());
    }

    #[test]
    fn test_zip_output() {
        let dir = tempfile::tempdir().unwrap();
        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        let photos = [photo("a.jpg", b"one"), photo("a.jpg", b"two")];
        let result = write_output(&photos, dir.path(), true, false, &ThrottledProgress::new(&cb)).unwrap();

        assert_eq!(result.assignments, [PathBuf::from("a.jpg"), PathBuf::from("a(1).jpg")]);
        let mut archive = zip::ZipArchive::new(File::open(dir.path().join(ZIP_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut body = String::new();
        archive.by_name("a(1).jpg").unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "two");
    }

    #[test]
    fn test_zip_output_does_not_clobber_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ZIP_FILE_NAME), b"keep").unwrap();
        let cb = |_: &str, _: u64, _: u64, _: &str| {};
        write_output(&[photo("a.jpg", b"one")], dir.path(), true, false, &ThrottledProgress::new(&cb)).unwrap();

        assert_eq!(fs::read(dir.path().join(ZIP_FILE_NAME)).unwrap(), b"keep");
        assert!(dir.path().join("geotagged_images(1).zip").exists());
    }
}
