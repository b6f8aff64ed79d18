//! Contest archive unpacking.
//!
//! Each selected `<name>.zip` is unpacked once into a sibling `<name>/`
//! directory. An existing directory counts as already unpacked, whatever
//! it contains. Extraction goes through a hidden staging directory that is
//! renamed into place only after every entry was written.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

pub const ARCHIVE_EXTENSION: &str = "zip";
/// Subdirectory of an unpacked contest archive that holds the packages.
pub const PROBLEMS_DIR_NAME: &str = "problems";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error unpacking {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Which archives of a directory to process, by base name.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSelection {
    names: Option<BTreeSet<String>>,
}

impl ArchiveSelection {
    /// Selects every archive.
    pub fn all() -> Self {
        Self { names: None }
    }

    /// Selects the given archives. Names may carry the `.zip` extension.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| strip_extension(name.as_ref()).to_string())
            .collect();
        Self { names: Some(names) }
    }

    pub fn contains(&self, base_name: &str) -> bool {
        match &self.names {
            None => true,
            Some(names) => names.contains(base_name),
        }
    }
}

fn strip_extension(name: &str) -> &str {
    name.strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
        .unwrap_or(name)
}

/// Returns the selected `.zip` files of `archives_dir`, in listing order.
pub fn selected_archives(
    archives_dir: &Path,
    selection: &ArchiveSelection,
) -> io::Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(archives_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(base_name) = file_name.strip_suffix(&format!(".{ARCHIVE_EXTENSION}")) else {
            continue;
        };
        if selection.contains(base_name) {
            archives.push(path);
        } else {
            debug!(archive = %file_name, "Archive not selected");
        }
    }
    Ok(archives)
}

/// Directory an archive unpacks into: the archive path without `.zip`.
pub fn unpack_dir(archive_path: &Path) -> PathBuf {
    archive_path.with_extension("")
}

/// Unpacks `archive_path` unless its unpack directory already exists, and
/// returns that directory.
pub fn ensure_extracted(archive_path: &Path) -> Result<PathBuf, ArchiveError> {
    let target = unpack_dir(archive_path);
    if target.exists() {
        debug!(target = %target.display(), "Archive already unpacked");
        return Ok(target);
    }

    info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "Unpacking archive"
    );
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |path: &Path, source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let staging = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(parent)
        .map_err(|e| io_err(parent, e))?;

    let count = extract_into(archive_path, staging.path())?;
    fs::rename(staging.path(), &target).map_err(|e| io_err(&target, e))?;
    info!(files = count, target = %target.display(), "Archive unpacked");
    Ok(target)
}

fn extract_into(archive_path: &Path, target_dir: &Path) -> Result<u32, ArchiveError> {
    let zip_err = |source| ArchiveError::Zip {
        path: archive_path.to_path_buf(),
        source,
    };
    let io_err = |path: &Path, source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(archive_path).map_err(|e| io_err(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(zip_err)?;

    let mut file_count = 0u32;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let outpath = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                warn!(entry = %entry.name(), "Skipping zip entry with unsafe path");
                continue;
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| io_err(&outpath, e))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut out = File::create(&outpath).map_err(|e| io_err(&outpath, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| io_err(&outpath, e))?;
        file_count += 1;
    }
    Ok(file_count)
}

/// Where the packages of an unpacked archive live: `<dir>/problems` when
/// present, `<dir>` otherwise.
pub fn import_root(unpack_dir: &Path) -> PathBuf {
    let problems = unpack_dir.join(PROBLEMS_DIR_NAME);
    if problems.is_dir() {
        problems
    } else {
        unpack_dir.to_path_buf()
    }
}
