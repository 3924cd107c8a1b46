//! Zip pre-staging of directory deliveries, so downloads of a whole book
//! can be served without zipping on demand.

use super::copy::unique_path;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Write `src_dir` into `<archive_dir>/<name>.zip`. Media files are already
/// compressed, so entries are stored.
pub fn stage_archive(src_dir: &Path, archive_dir: &Path, name: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(archive_dir)?;
    let target = unique_path(archive_dir, &format!("{}.zip", name));
    let partial = target.with_extension("zip.partial");

    let result = write_archive(src_dir, &partial);
    if let Err(err) = result {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    fs::rename(&partial, &target)?;
    Ok(target)
}

fn write_archive(src_dir: &Path, dest: &Path) -> io::Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(io::Error::other)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(io::Error::other)?;
        } else {
            zip.start_file(name, options).map_err(io::Error::other)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            io::copy(&mut reader, &mut zip)?;
        }
    }

    let mut writer = zip.finish().map_err(io::Error::other)?;
    io::Write::flush(&mut writer)?;
    Ok(())
}
