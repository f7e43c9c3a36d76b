//! Zip archives of the server directory.
//!
//! Google Cloud saves are single zip objects. Entry paths are relative to
//! the server directory so an archive can be unpacked anywhere.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Write every file and directory under `dir` into a zip on `writer`.
///
/// # Errors
///
/// Returns an error if `dir` cannot be walked or the archive cannot be written.
pub fn zip_dir<W: Write + Seek>(dir: &Path, writer: W) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_entries(&mut zip, dir, "", options)?;

    Ok(zip.finish()?)
}

/// Zip `dir` into memory.
///
/// # Errors
///
/// Returns an error if `dir` cannot be walked.
pub fn zip_dir_to_vec(dir: &Path) -> Result<Vec<u8>> {
    Ok(zip_dir(dir, Cursor::new(Vec::new()))?.into_inner())
}

fn add_entries<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            add_entries(zip, &path, &format!("{name}/"), options)?;
        } else {
            debug!(entry = %name, "Archiving");
            zip.start_file(name, options)?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
        }
    }

    Ok(())
}

/// Extract a zip archive into `dir`, creating it if needed.
///
/// Entries that would land outside `dir` are rejected.
///
/// # Errors
///
/// Returns an error if the archive is malformed or cannot be written out.
pub fn unzip_into<R: Read + Seek>(reader: R, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut archive = ZipArchive::new(reader)?;
    let count = archive.len();
    // `extract` refuses entries whose names escape the target directory
    archive.extract(dir)?;
    Ok(count)
}

/// Extract an in-memory zip archive into `dir`.
///
/// # Errors
///
/// Returns an error if the archive is malformed or cannot be written out.
pub fn unzip_bytes(bytes: &[u8], dir: &Path) -> Result<usize> {
    unzip_into(Cursor::new(bytes), dir)
}
