use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use encoding_rs::SHIFT_JIS;

use crate::error::GeotagError;
use crate::ThrottledProgress;

/// Raw bytes of one photo, named by its file name.
#[derive(Debug, Clone)]
pub struct PhotoSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Decode ZIP entry name, trying UTF-8 first, then Shift_JIS
fn decode_zip_name(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    // Common for ZIPs made by Japanese Windows tools
    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

fn is_jpeg(name: &str) -> bool {
    mime_guess::from_path(name)
        .first()
        .is_some_and(|m| m == mime_guess::mime::IMAGE_JPEG)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Expand the inputs into photos, in input order.
///
/// - a directory contributes every JPEG below it, sorted by path
/// - a `.zip` file contributes its JPEG entries in archive order
/// - any other file is taken as a photo as is
pub fn collect_photos(
    inputs: &[PathBuf],
    progress: &ThrottledProgress,
) -> Result<Vec<PhotoSource>, GeotagError> {
    let mut photos = Vec::new();
    let total = inputs.len() as u64;

    for (i, input) in inputs.iter().enumerate() {
        progress.report("scan", i as u64, total, &format!("Scanning {}", input.display()));

        if input.is_dir() {
            let mut files = Vec::new();
            walk_dir(input, &mut files)?;
            files.sort();
            for path in files {
                let name = file_name(&path);
                if is_jpeg(&name) {
                    photos.push(PhotoSource {
                        name,
                        bytes: fs::read(&path)?,
                    });
                }
            }
        } else if is_zip(input) {
            read_zip(input, &mut photos)?;
        } else {
            photos.push(PhotoSource {
                name: file_name(input),
                bytes: fs::read(input)?,
            });
        }
    }

    progress.report("scan", total, total, &format!("Found {} photo(s)", photos.len()));
    Ok(photos)
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), GeotagError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn read_zip(path: &Path, photos: &mut Vec<PhotoSource>) -> Result<(), GeotagError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let entry_path = decode_zip_name(entry.name_raw());
        let name = Path::new(&entry_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        if name.is_empty() || !is_jpeg(&name) {
            continue;
        }

        // The declared size comes from the archive and is not trusted.
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        photos.push(PhotoSource { name, bytes });
    }

    Ok(())
}
