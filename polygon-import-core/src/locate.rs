//! Finding problem packages on disk and normalising their layout.
//!
//! A problem package is a directory with a `problem.xml` descriptor directly
//! inside it. Batches are organised one package per subdirectory, but
//! unpacked contest archives often wrap that in extra levels, so the real
//! batch root is found by searching for the first descriptor.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DESCRIPTOR_FILE_NAME: &str = "problem.xml";
/// Descriptor name used by packages exported straight from Polygon when a
/// second descriptor sits next to it.
pub const ALTERNATE_DESCRIPTOR_FILE_NAME: &str = "problem.xml.polygon";
pub const DESCRIPTOR_BACKUP_SUFFIX: &str = ".pcms";
pub const DOCUMENTS_DIR_NAME: &str = "documents";
pub const DOCUMENT_PLACEHOLDERS: [&str; 2] = ["description.txt", "tutorial.txt"];

/// Returns the directory whose immediate children are problem packages.
///
/// The tree below `src_dir` is searched depth-first (entries sorted by name)
/// for a `problem.xml`; the result is the parent of the directory holding the
/// first match. Without any match `src_dir` itself is returned.
pub fn find_true_src_dir(src_dir: &Path) -> io::Result<PathBuf> {
    match find_descriptor_dir(src_dir)? {
        Some(package_dir) => {
            let true_src = package_dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| src_dir.to_path_buf());
            if true_src != src_dir {
                info!(
                    src_dir = %src_dir.display(),
                    true_src_dir = %true_src.display(),
                    "Located nested problem packages"
                );
            }
            Ok(true_src)
        }
        None => {
            debug!(src_dir = %src_dir.display(), "No descriptor found, using source dir as is");
            Ok(src_dir.to_path_buf())
        }
    }
}

fn find_descriptor_dir(dir: &Path) -> io::Result<Option<PathBuf>> {
    if dir.join(DESCRIPTOR_FILE_NAME).is_file() {
        return Ok(Some(dir.to_path_buf()));
    }
    // Symlinked directories are not descended into.
    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    subdirs.sort();

    for subdir in subdirs {
        match find_descriptor_dir(&subdir) {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, path = %subdir.display(), "Skipping unreadable directory");
            }
        }
    }
    Ok(None)
}

/// Lists the candidate problem directories of a batch root in directory
/// listing order. Plain files are ignored.
pub fn problem_dirs(src_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(src_dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

/// Makes `problem.xml` the Polygon-flavoured descriptor when a
/// `problem.xml.polygon` is present: the existing descriptor is kept as
/// `problem.xml.pcms` and the alternate one takes its name. Returns whether
/// anything was renamed; a second call is a no-op.
pub fn reconcile_descriptor(problem_dir: &Path) -> io::Result<bool> {
    let alternate = problem_dir.join(ALTERNATE_DESCRIPTOR_FILE_NAME);
    if !alternate.exists() {
        return Ok(false);
    }

    let descriptor = problem_dir.join(DESCRIPTOR_FILE_NAME);
    if descriptor.exists() {
        let backup = problem_dir.join(format!("{DESCRIPTOR_FILE_NAME}{DESCRIPTOR_BACKUP_SUFFIX}"));
        fs::rename(&descriptor, &backup)?;
    }
    fs::rename(&alternate, &descriptor)?;
    info!(problem_dir = %problem_dir.display(), "Switched to Polygon descriptor");
    Ok(true)
}

/// Ensures `documents/description.txt` and `documents/tutorial.txt` exist,
/// creating empty files where missing. Existing files are left alone.
pub fn ensure_documents(problem_dir: &Path) -> io::Result<()> {
    let documents = problem_dir.join(DOCUMENTS_DIR_NAME);
    fs::create_dir_all(&documents)?;
    for name in DOCUMENT_PLACEHOLDERS {
        let path = documents.join(name);
        if !path.exists() {
            fs::File::create(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<problem/>").unwrap();
    }

    #[test]
    fn nested_package_resolves_to_its_parent_dir() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("archive1");
        touch(&archive.join("problems/probA/problem.xml"));

        let found = find_true_src_dir(&archive).unwrap();
        assert_eq!(found, archive.join("problems"));
    }

    #[test]
    fn flat_layout_resolves_to_itself() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("a/problem.xml"));
        touch(&tmp.path().join("b/problem.xml"));

        assert_eq!(find_true_src_dir(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn missing_descriptor_falls_back_to_given_dir() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("empty/deeper")).unwrap();

        assert_eq!(find_true_src_dir(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn search_order_is_by_name() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("b/x/p/problem.xml"));
        touch(&tmp.path().join("a/y/p/problem.xml"));

        assert_eq!(find_true_src_dir(tmp.path()).unwrap(), tmp.path().join("a/y"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_searched() {
        let tmp = tempdir().unwrap();
        let outside = tempdir().unwrap();
        touch(&outside.path().join("pkg/p/problem.xml"));
        fs::create_dir(tmp.path().join("batch")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("pkg"), tmp.path().join("batch/link"))
            .unwrap();
        // A cycle back to the root must not recurse forever.
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("batch/loop")).unwrap();

        let batch = tmp.path().join("batch");
        assert_eq!(find_true_src_dir(&batch).unwrap(), batch);
    }

    #[test]
    fn problem_dirs_skips_files() {
        let tmp = tempdir().unwrap();
        fs::create_dir(tmp.path().join("p1")).unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let dirs = problem_dirs(tmp.path()).unwrap();
        assert_eq!(dirs, vec![tmp.path().join("p1")]);
    }

    #[test]
    fn reconcile_descriptor_is_idempotent() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("problem.xml"), "pcms").unwrap();
        fs::write(dir.join("problem.xml.polygon"), "polygon").unwrap();

        assert!(reconcile_descriptor(dir).unwrap());
        assert!(!reconcile_descriptor(dir).unwrap());

        assert_eq!(fs::read_to_string(dir.join("problem.xml")).unwrap(), "polygon");
        assert_eq!(fs::read_to_string(dir.join("problem.xml.pcms")).unwrap(), "pcms");
        assert!(!dir.join("problem.xml.polygon").exists());
    }

    #[test]
    fn ensure_documents_keeps_existing_content() {
        let tmp = tempdir().unwrap();
        let documents = tmp.path().join("documents");
        fs::create_dir(&documents).unwrap();
        fs::write(documents.join("tutorial.txt"), "solution sketch").unwrap();

        ensure_documents(tmp.path()).unwrap();
        ensure_documents(tmp.path()).unwrap();

        assert_eq!(fs::read_to_string(documents.join("description.txt")).unwrap(), "");
        assert_eq!(
            fs::read_to_string(documents.join("tutorial.txt")).unwrap(),
            "solution sketch"
        );
    }
}
