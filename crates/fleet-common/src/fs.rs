//! Filesystem helpers shared by the registry, renderer and reconciler

use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::IoResultExt;
use crate::{Error, Result};

/// Create `path` and its parents if missing. Existing directories are fine.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).at(path)
}

/// Whether `path` exists. Permission errors are surfaced instead of being
/// reported as "missing".
pub fn exists(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Replace `path` with `contents` via a sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = stage(path, contents)?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Create `path` with `contents` unless it already exists.
///
/// Returns `Ok(false)` when something else created the file first; the
/// existing file is left untouched.
pub fn create_new_atomic(path: &Path, contents: &[u8]) -> Result<bool> {
    let tmp = stage(path, contents)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(Error::io(path, e.error)),
    }
}

fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir).at(dir)?;
    tmp.write_all(contents).at(tmp.path())?;
    tmp.as_file().sync_all().at(tmp.path())?;
    Ok(tmp)
}

/// Directory holding `path`; `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_create_new_atomic_never_clobbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment.yaml");

        assert!(create_new_atomic(&path, b"first").unwrap());
        assert!(!create_new_atomic(&path, b"second").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.yaml");
        create_new_atomic(&path, b"x").unwrap();
        create_new_atomic(&path, b"y").unwrap();

        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("ports.txt")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/ports.txt")), Path::new("a"));
    }
}
