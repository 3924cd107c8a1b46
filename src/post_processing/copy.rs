//! Copying deliveries into the library. Sources are never moved: the
//! download client keeps seeding from them.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// A failed copy, split by the side that failed.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Cannot read {path:?}: {source}")]
    Source { path: PathBuf, source: io::Error },

    #[error("Cannot write {path:?}: {source}")]
    Destination { path: PathBuf, source: io::Error },
}

impl CopyError {
    pub fn io_error(&self) -> &io::Error {
        match self {
            CopyError::Source { source, .. } | CopyError::Destination { source, .. } => source,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            CopyError::Source { path, .. } | CopyError::Destination { path, .. } => path,
        }
    }
}

fn reading(path: &Path) -> impl FnOnce(io::Error) -> CopyError + '_ {
    move |source| CopyError::Source {
        path: path.to_path_buf(),
        source,
    }
}

fn writing(path: &Path) -> impl FnOnce(io::Error) -> CopyError + '_ {
    move |source| CopyError::Destination {
        path: path.to_path_buf(),
        source,
    }
}

// EOPNOTSUPP/ENOTSUP, EXDEV, EINVAL, ENOSYS
#[cfg(target_os = "macos")]
const FALLBACK_ERRNOS: &[i32] = &[102, 45, 18, 22, 78];
#[cfg(not(target_os = "macos"))]
const FALLBACK_ERRNOS: &[i32] = &[95, 18, 22, 38];

/// NFS and some FUSE mounts reject the kernel copy fast path.
fn needs_buffered_fallback(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
        || err.raw_os_error().is_some_and(|code| FALLBACK_ERRNOS.contains(&code))
}

/// Copy one file, falling back to a buffered copy when the fast path is
/// not supported by the filesystem. Other errors propagate.
///
/// The source is opened first so that an unreadable source is reported as
/// such; failures of the copy itself are charged to the destination.
pub fn copy_file(src: &Path, dest: &Path) -> Result<u64, CopyError> {
    File::open(src).map_err(reading(src))?;
    match fs::copy(src, dest) {
        Ok(bytes) => Ok(bytes),
        Err(err) if needs_buffered_fallback(&err) => {
            debug!("Fast copy of {:?} failed ({}), using buffered copy", src, err);
            buffered_copy(src, dest)
        }
        Err(err) => Err(writing(dest)(err)),
    }
}

/// Plain read/write copy that preserves permissions and modification time.
pub fn buffered_copy(src: &Path, dest: &Path) -> Result<u64, CopyError> {
    let metadata = fs::metadata(src).map_err(reading(src))?;
    let mut reader = BufReader::new(File::open(src).map_err(reading(src))?);
    let mut writer = BufWriter::new(File::create(dest).map_err(writing(dest))?);
    let bytes = io::copy(&mut reader, &mut writer).map_err(writing(dest))?;
    writer.flush().map_err(writing(dest))?;
    let file = writer
        .into_inner()
        .map_err(|e| writing(dest)(e.into_error()))?;

    if let Ok(modified) = metadata.modified() {
        file.set_modified(modified).map_err(writing(dest))?;
    }
    drop(file);
    fs::set_permissions(dest, metadata.permissions()).map_err(writing(dest))?;
    Ok(bytes)
}

/// First free path for `name` in `dir`, adding ` (n)` before the extension.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = as_path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1;
    loop {
        let numbered = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// What a copy delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    /// The delivered file, or the destination directory for multi-file
    /// sources.
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Copy a single file into `dest_dir` as `stem` plus the source extension.
pub fn copy_single_file(src: &Path, dest_dir: &Path, stem: &str) -> Result<CopyReport, CopyError> {
    fs::create_dir_all(dest_dir).map_err(writing(dest_dir))?;
    let name = match src.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem.to_string(),
    };
    let dest = unique_path(dest_dir, &name);
    let bytes = copy_file(src, &dest)?;
    Ok(CopyReport {
        path: dest,
        files: 1,
        bytes,
    })
}

/// Copy the contents of `src` into `dest_dir`, keeping the relative
/// layout. Files that collide with existing ones get a numbered name.
pub fn copy_tree(src: &Path, dest_dir: &Path) -> Result<CopyReport, CopyError> {
    fs::create_dir_all(dest_dir).map_err(writing(dest_dir))?;
    let mut files = 0;
    let mut bytes = 0;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            CopyError::Source {
                path,
                source: e.into(),
            }
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| reading(entry.path())(io::Error::other(e)))?;
        let target = dest_dir.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(writing(&target))?;
            continue;
        }
        let parent = target.parent().unwrap_or(dest_dir);
        fs::create_dir_all(parent).map_err(writing(parent))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let dest = unique_path(parent, &name);
        bytes += copy_file(entry.path(), &dest)?;
        files += 1;
    }

    Ok(CopyReport {
        path: dest_dir.to_path_buf(),
        files,
        bytes,
    })
}
