//! In-memory view of a file tree that policy rules evaluate.
//!
//! Paths are relative, `/`-separated and never start with `./`. Directories are
//! implied by the files beneath them and can also be registered explicitly so
//! empty directories still count as present.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeView {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl TreeView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file, registering its ancestor directories.
    pub fn insert_file(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        let path = normalize_path(&path.into());
        let mut ancestor = path.as_str();
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            self.dirs.insert(parent.to_string());
            ancestor = parent;
        }
        self.files.insert(path, contents.into());
    }

    pub fn insert_dir(&mut self, path: impl Into<String>) {
        let path = normalize_path(&path.into());
        if path.is_empty() {
            return;
        }
        let mut current = path.as_str();
        loop {
            self.dirs.insert(current.to_string());
            match current.rsplit_once('/') {
                Some((parent, _)) => current = parent,
                None => break,
            }
        }
    }

    /// Copy every file of `other` over this view (staged overlay).
    pub fn overlay(&mut self, other: &TreeView) {
        for dir in &other.dirs {
            self.dirs.insert(dir.clone());
        }
        for (path, contents) in &other.files {
            self.files.insert(path.clone(), contents.clone());
        }
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(&normalize_path(path))
    }

    pub fn contents(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize_path(path)).map(String::as_str)
    }

    /// Files in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Files whose path starts with `dir/`, in path order.
    pub fn files_under<'a>(
        &'a self,
        dir: &str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let prefix = format!("{}/", normalize_path(dir));
        self.files().filter(move |(path, _)| path.starts_with(&prefix))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Relative form used as a tree key: no leading `./`, no surrounding `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_start_matches("./").trim_matches('/');
    trimmed.to_string()
}
