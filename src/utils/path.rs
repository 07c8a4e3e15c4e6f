//! Path normalization utilities.
//!
//! Provides consistent path handling across the codebase:
//! - `normalize_path` - file system paths (canonicalize + fallback)
//! - `lexical_normalize` - collapse `.`/`..` without touching the filesystem

use std::path::{Path, PathBuf};

/// Normalize a file system path to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Return as-is if already absolute
/// - Join with current directory if relative
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Collapse `.` and `..` segments without touching the filesystem.
///
/// Used by the component resolver, where imported paths may not exist yet
/// and `canonicalize()` would fail.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_absolute() {
        let path = Path::new("/absolute/path/file.txt");
        let normalized = normalize_path(path);
        assert!(normalized.is_absolute());
    }

    #[test]
    fn test_normalize_path_relative() {
        let path = Path::new("relative/file.txt");
        let normalized = normalize_path(path);
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("relative/file.txt"));
    }

    #[test]
    fn test_lexical_normalize_parent_dirs() {
        let path = Path::new("/templates/home/../shared/Button.svelte");
        assert_eq!(
            lexical_normalize(path),
            PathBuf::from("/templates/shared/Button.svelte")
        );
    }

    #[test]
    fn test_lexical_normalize_current_dir() {
        let path = Path::new("/templates/./home/./index.svelte");
        assert_eq!(
            lexical_normalize(path),
            PathBuf::from("/templates/home/index.svelte")
        );
    }
}
