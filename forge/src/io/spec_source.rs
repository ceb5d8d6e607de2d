//! Read `spec/` into a [`SpecTree`].
//!
//! `*.yml`/`*.yaml` files are parsed as YAML and `*.md` files are kept as
//! plain strings, each keyed by file stem. Only the top level is read.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::canonical::SpecTree;

pub fn load_spec_tree(spec_dir: &Path) -> Result<SpecTree> {
    if !spec_dir.is_dir() {
        return Err(anyhow!("spec directory not found: {}", spec_dir.display()));
    }
    let mut tree = SpecTree::new();
    let mut entries = fs::read_dir(spec_dir)
        .with_context(|| format!("read {}", spec_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read {}", spec_dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let value = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("parse {}", path.display()))?,
            "md" => serde_yaml::Value::String(contents),
            _ => continue,
        };
        if tree.insert(stem.to_string(), value).is_some() {
            return Err(anyhow!(
                "spec name '{stem}' is defined by more than one file in {}",
                spec_dir.display()
            ));
        }
    }
    debug!(dir = %spec_dir.display(), documents = tree.len(), "spec tree loaded");
    Ok(tree)
}
