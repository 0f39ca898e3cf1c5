//! Workspace traversal shared by the scanner and the build orchestrator.

use std::path::Path;

use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

/// True for any path component that must prune its whole subtree: hidden
/// entries (leading `.`) and Python bytecode caches.
fn is_internal(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || name == "__pycache__")
        .unwrap_or(false)
}

/// Walk a workspace and return the relative paths of all surviving regular
/// files, sorted and with forward-slash separators regardless of host OS.
pub fn walk_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_internal(e))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel = rel
            .iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(rel);
    }

    files.sort();
    Ok(files)
}
