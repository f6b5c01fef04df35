use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::types::PathString;

/// Filesystem transport that lists files under a root in a stable order.
#[derive(Clone, Debug)]
pub struct FileWalker {
    root: PathBuf,
    follow_links: bool,
}

impl FileWalker {
    /// Create a walker rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_links: true,
        }
    }

    /// Configure symlink traversal.
    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// Root directory being walked.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every regular file under the root, sorted by root-relative path.
    /// Unreadable directory entries are skipped.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        candidates.sort();
        candidates
    }
}

/// Root-relative path with `/` separators, or `None` when `path` is not
/// under `root`.
pub fn relative_path_string(root: &Path, path: &Path) -> Option<PathString> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Best-effort file modified time.
pub fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    Some(system_time_to_utc(modified))
}

fn system_time_to_utc(time: std::time::SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn files_are_sorted_and_directories_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::write(dir.path().join("b/nested/z.krn"), "z").unwrap();
        fs::write(dir.path().join("a.krn"), "a").unwrap();
        fs::write(dir.path().join("b/c.krn"), "c").unwrap();

        let walker = FileWalker::new(dir.path());
        let relative: Vec<String> = walker
            .files()
            .iter()
            .filter_map(|path| relative_path_string(walker.root(), path))
            .collect();
        assert_eq!(relative, vec!["a.krn", "b/c.krn", "b/nested/z.krn"]);
    }

    #[test]
    fn relative_path_outside_root_is_none() {
        assert!(relative_path_string(Path::new("/data/a"), Path::new("/data/b/x.krn")).is_none());
    }

    #[test]
    fn mtime_is_reported_for_existing_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.krn");
        fs::write(&path, "x").unwrap();
        assert!(file_mtime(&path).is_some());
        assert!(file_mtime(&dir.path().join("missing")).is_none());
    }
}
