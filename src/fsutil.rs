//! File-tree helpers shared by the backup engine and the packager.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Suffix for in-flight copies. Never left behind on success.
const TEMP_SUFFIX: &str = ".tollgate-tmp";

/// A file operation that failed, with the path it failed on.
#[derive(Debug)]
pub struct FileError {
    /// Path relative to the tree being processed.
    pub path: PathBuf,
    /// Underlying error.
    pub error: io::Error,
}

impl FileError {
    fn new(path: impl Into<PathBuf>, error: io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Copy `src` to `dst` through a sibling temp file and rename.
///
/// Readers of `dst` see either the old or the new content, never a mix.
pub fn atomic_copy(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = dst.file_name().unwrap_or_default().to_os_string();
    temp_name.push(TEMP_SUFFIX);
    let temp = dst.with_file_name(temp_name);

    let copied = match fs::copy(src, &temp) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&temp, dst) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    Ok(copied)
}

/// Relative paths of every regular file under `root`, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Copy every file under `src` into `dst`, preserving relative paths.
///
/// Each file is copied atomically. A failure on one file is recorded and the
/// walk continues.
pub fn copy_tree(src: &Path, dst: &Path) -> (Vec<PathBuf>, Vec<FileError>) {
    let mut copied = Vec::new();
    let mut errors = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| p.strip_prefix(src).ok())
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                errors.push(FileError::new(path, io::Error::other(e)));
                continue;
            }
        };

        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            if let Err(e) = fs::create_dir_all(&target) {
                errors.push(FileError::new(rel, e));
            }
        } else if entry.file_type().is_file() {
            match atomic_copy(entry.path(), &target) {
                Ok(_) => copied.push(rel.to_path_buf()),
                Err(e) => errors.push(FileError::new(rel, e)),
            }
        }
    }

    (copied, errors)
}

/// Whether a removal failure means "someone else has the file open".
pub fn is_lock_error(error: &io::Error) -> bool {
    match error.raw_os_error() {
        // EBUSY
        #[cfg(unix)]
        Some(16) => true,
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        #[cfg(windows)]
        Some(32) | Some(33) => true,
        _ => false,
    }
}

/// Delete everything under `root`, then `root` itself.
///
/// Missing and locked entries are skipped. Other failures are returned.
pub fn remove_tree_best_effort(root: &Path) -> Vec<FileError> {
    let mut errors = Vec::new();
    let mut skipped_locked = false;
    if !root.exists() {
        return errors;
    }

    for entry in WalkDir::new(root).contents_first(true).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(io) = e.io_error() {
                    if io.kind() == ErrorKind::NotFound {
                        continue;
                    }
                }
                errors.push(FileError::new(
                    e.path().map(Path::to_path_buf).unwrap_or_default(),
                    io::Error::other(e),
                ));
                continue;
            }
        };

        let result = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };

        if let Err(e) = result {
            if is_lock_error(&e) {
                skipped_locked = true;
            }
            // A directory still holding a skipped file cannot go either.
            let held_open = skipped_locked && entry.file_type().is_dir();
            if e.kind() == ErrorKind::NotFound || is_lock_error(&e) || held_open {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping removal");
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            errors.push(FileError::new(rel, e));
        }
    }

    errors
}

/// Content checksum of a whole tree: SHA-256 over sorted relative paths and
/// file bytes. Equal checksums mean equal trees.
pub fn tree_checksum(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for rel in list_files(root)? {
        let bytes = fs::read(root.join(&rel))?;
        let name = rel.to_string_lossy().replace('\\', "/");
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Total size in bytes of the files under `root`.
pub fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("assets/img")).unwrap();
        fs::write(root.join("index.html"), "<html></html>").unwrap();
        fs::write(root.join("assets/app.js"), "console.log(1)").unwrap();
        fs::write(root.join("assets/img/logo.png"), [0u8, 1, 2, 3]).unwrap();
    }

    #[test]
    fn atomic_copy_replaces_content() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("deep/dst.txt");
        fs::write(&src, "new").unwrap();

        assert_eq!(atomic_copy(&src, &dst).unwrap(), 3);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new");

        let leftovers: Vec<_> = fs::read_dir(dst.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn atomic_copy_missing_source_leaves_target() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dst.txt");
        fs::write(&dst, "old").unwrap();

        assert!(atomic_copy(&dir.path().join("missing"), &dst).is_err());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "old");
    }

    #[test]
    fn copy_tree_preserves_layout() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        populate(&src);

        let (copied, errors) = copy_tree(&src, &dst);
        assert!(errors.is_empty());
        assert_eq!(copied.len(), 3);
        assert_eq!(tree_checksum(&src).unwrap(), tree_checksum(&dst).unwrap());
    }

    #[test]
    fn tree_checksum_detects_changes() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let before = tree_checksum(dir.path()).unwrap();

        fs::write(dir.path().join("assets/app.js"), "console.log(2)").unwrap();
        assert_ne!(before, tree_checksum(dir.path()).unwrap());
    }

    #[test]
    fn remove_tree_clears_everything() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("app");
        populate(&root);

        let errors = remove_tree_best_effort(&root);
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(!root.exists());
    }

    #[test]
    fn remove_missing_tree_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(remove_tree_best_effort(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn lock_errors_are_recognized() {
        #[cfg(unix)]
        assert!(is_lock_error(&io::Error::from_raw_os_error(16)));
        #[cfg(windows)]
        assert!(is_lock_error(&io::Error::from_raw_os_error(32)));
        assert!(!is_lock_error(&io::Error::new(ErrorKind::Other, "nope")));
    }

    #[test]
    fn tree_size_sums_files() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        assert_eq!(tree_size(dir.path()), 13 + 14 + 4);
    }
}
