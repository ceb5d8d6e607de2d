//! Load a target directory into a [`TreeView`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::core::tree::TreeView;

/// Top-level entries that belong to tooling, not workshop content.
const SKIPPED: [&str; 2] = [".forge", ".git"];

/// Read every file under `root` (recursively). A missing root is an empty tree.
pub fn scan_tree(root: &Path) -> Result<TreeView> {
    let mut tree = TreeView::new();
    if !root.exists() {
        debug!(root = %root.display(), "target does not exist yet");
        return Ok(tree);
    }
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = relative(root, entry.path())?;
        if entry.file_type().is_dir() {
            tree.insert_dir(rel);
        } else if entry.file_type().is_file() {
            let bytes = fs::read(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?;
            tree.insert_file(rel, String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    debug!(root = %root.display(), files = tree.len(), "target scanned");
    Ok(tree)
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() == 1
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED.contains(&name))
}

fn relative(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
