//! Zip download of a saved generation.

use std::ffi::OsStr;
use std::io::{Cursor, Write};
use std::path::Path;

use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};

/// Directory and file names left out of a download.
const EXCLUDED: &[&str] = &["node_modules", "dist", ".git", ".env", ".DS_Store"];

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0 && EXCLUDED.iter().any(|name| entry.file_name() == OsStr::new(name))
}

/// Zip the contents of `dir`, with entry names relative to it.
///
/// Dependencies and build output are skipped, so the archive holds only the
/// generated sources.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let zip_error = |e: zip::result::ZipError| Error::persistence(dir, std::io::Error::other(e));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
            Error::persistence(path, e.into())
        })?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Collaborator(e.into()))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(zip_error)?;
        } else if entry.file_type().is_file() {
            let bytes = std::fs::read(entry.path()).map_err(|e| Error::persistence(entry.path(), e))?;
            zip.start_file(name, options).map_err(zip_error)?;
            zip.write_all(&bytes)
                .map_err(|e| Error::persistence(entry.path(), e))?;
        }
    }

    Ok(zip.finish().map_err(zip_error)?.into_inner())
}
