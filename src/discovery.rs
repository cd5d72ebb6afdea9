//! Capture file discovery
//!
//! Walks the source root recursively and records each capture's path relative
//! to the root, which later keeps report names apart for captures that share a
//! base name.

use crate::error::{CaptureError, Result};
use std::path::{Path, PathBuf};

/// Default capture file extension
pub const DEFAULT_EXTENSION: &str = "blg";

/// A capture discovered under the source root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureFile {
    pub path: PathBuf,
    /// Size in bytes at discovery time
    pub len: u64,
    /// Path relative to the source root
    pub relative_path: PathBuf,
}

impl CaptureFile {
    /// Relative path with `/` separators, as shown in the fleet summary
    pub fn display_name(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Find every capture with `extension` (case-insensitive) under `root`
///
/// Results are sorted by relative path. Unreadable subdirectories are logged
/// and skipped; an empty result is a `Discovery` error.
pub fn discover_captures(root: &Path, extension: &str) -> Result<Vec<CaptureFile>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir.as_path() == root => return Err(e.into()),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                pending.push(path);
            } else if has_extension(&path, extension) {
                let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                found.push(CaptureFile {
                    path,
                    len,
                    relative_path,
                });
            }
        }
    }

    if found.is_empty() {
        return Err(CaptureError::Discovery {
            root: root.to_path_buf(),
            extension: extension.to_string(),
        });
    }

    found.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::info!(count = found.len(), root = %root.display(), "discovered captures");
    Ok(found)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discovers_nested_captures() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("siteA/day1")).unwrap();
        fs::create_dir_all(root.path().join("siteB")).unwrap();
        fs::write(root.path().join("siteA/day1/host.blg"), b"x").unwrap();
        fs::write(root.path().join("siteB/host.BLG"), b"xy").unwrap();
        fs::write(root.path().join("siteB/notes.txt"), b"ignored").unwrap();

        let captures = discover_captures(root.path(), DEFAULT_EXTENSION).unwrap();
        let names: Vec<String> = captures.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["siteA/day1/host.blg", "siteB/host.BLG"]);
        assert_eq!(captures[1].len, 2);
    }

    #[test]
    fn test_no_captures_is_discovery_error() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("readme.md"), b"x").unwrap();
        assert!(matches!(
            discover_captures(root.path(), "blg"),
            Err(CaptureError::Discovery { .. })
        ));
    }

    #[test]
    fn test_missing_root_is_error() {
        assert!(discover_captures(Path::new("/no/such/root/dir"), "blg").is_err());
    }

    #[test]
    fn test_extension_with_leading_dot() {
        assert!(has_extension(Path::new("a/b.blg"), ".blg"));
        assert!(!has_extension(Path::new("a/blg"), "blg"));
    }
}
