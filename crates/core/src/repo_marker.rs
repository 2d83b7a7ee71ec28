//! Repository detection shared with repository browsers.
//!
//! A directory holding the version-control metadata marker is a working copy
//! and is treated as a leaf: browsers list it but never descend into it.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::git::METADATA_DIR;

/// Whether `dir` contains the version-control metadata marker.
pub fn has_metadata_marker<P: AsRef<Path>>(dir: P) -> bool {
    dir.as_ref().join(METADATA_DIR).exists()
}

/// Immediate child directories of `root` that are repositories, sorted by path.
///
/// `root` itself is not reported. Unreadable entries are skipped.
pub fn find_repositories<P: AsRef<Path>>(root: P) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(root.as_ref())? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.is_dir() && has_metadata_marker(&path) {
            found.push(path);
        }
    }
    found.sort();
    debug!(root = %root.as_ref().display(), count = found.len(), "scanned for repositories");
    Ok(found)
}
