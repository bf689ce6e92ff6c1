//! Ambient package lookup
//!
//! Walks from a start directory up to the filesystem root, checking
//! `node_modules/<name>` at each level. Found packages are only read.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the package directory searched at every level
pub const PACKAGE_DIR: &str = "node_modules";

/// Find the nearest `node_modules/<name>` at or above `start`
pub fn find_local_package(start: &Path, name: &str) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(PACKAGE_DIR).join(name);
        if candidate.is_dir() {
            debug!("Found ambient {} at {}", name, candidate.display());
            return Some(candidate);
        }
    }
    None
}

/// The `node_modules` directory that holds a located package
///
/// Scoped packages sit one level deeper (`node_modules/@scope/name`).
pub fn modules_dir_of(package_dir: &Path, name: &str) -> PathBuf {
    let depth = name.split('/').count();
    let mut dir = package_dir;
    for _ in 0..depth {
        dir = dir.parent().unwrap_or(dir);
    }
    dir.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_package_in_start_dir() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("node_modules/test-pkg")).unwrap();

        let found = find_local_package(root.path(), "test-pkg").unwrap();
        assert_eq!(found, root.path().join("node_modules/test-pkg"));
    }

    #[test]
    fn walks_upward() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("node_modules/test-pkg")).unwrap();
        let nested = root.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let found = find_local_package(&nested, "test-pkg").unwrap();
        assert_eq!(found, root.path().join("node_modules/test-pkg"));
    }

    #[test]
    fn nearest_match_wins() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("node_modules/dup")).unwrap();
        fs::create_dir_all(root.path().join("inner/node_modules/dup")).unwrap();

        let found = find_local_package(&root.path().join("inner"), "dup").unwrap();
        assert_eq!(found, root.path().join("inner/node_modules/dup"));
    }

    #[test]
    fn missing_package_is_none() {
        let root = TempDir::new().unwrap();
        assert!(find_local_package(root.path(), "surely-not-installed-pkg-xyz").is_none());
    }

    #[test]
    fn plain_file_is_not_a_package() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("node_modules")).unwrap();
        fs::write(root.path().join("node_modules/not-a-dir"), "").unwrap();
        assert!(find_local_package(root.path(), "not-a-dir").is_none());
    }

    #[test]
    fn scoped_package_modules_dir() {
        let pkg = Path::new("/p/node_modules/@scope/name");
        assert_eq!(modules_dir_of(pkg, "@scope/name"), Path::new("/p/node_modules"));
        let plain = Path::new("/p/node_modules/name");
        assert_eq!(modules_dir_of(plain, "name"), Path::new("/p/node_modules"));
    }
}
