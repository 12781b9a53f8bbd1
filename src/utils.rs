// SPDX-License-Identifier: MIT OR Apache-2.0

//! Utility functions for mddedup

use std::path::{Path, PathBuf};

use crate::errors::{DedupError, DedupResult};

/// The name of the per-workspace state directory
pub const WORKSPACE_DIR: &str = ".mddedup";

/// Cache directory inside [`WORKSPACE_DIR`]
pub const CACHE_DIR: &str = "cache";

/// Find the workspace root by walking up from the given path.
///
/// The root is the nearest directory containing a `.mddedup` folder. Falls
/// back to the (canonicalized) start path when none is found.
pub fn find_workspace_root(start: impl AsRef<Path>) -> PathBuf {
    let mut current = start.as_ref().to_path_buf();

    // Canonicalize to handle relative paths
    if let Ok(canonical) = current.canonicalize() {
        current = canonical;
    }

    let original = current.clone();

    loop {
        let state_dir = current.join(WORKSPACE_DIR);
        if state_dir.is_dir() {
            return current;
        }

        if !current.pop() {
            break;
        }
    }

    original
}

/// Resolves `target` and checks that it lies inside `root`.
///
/// Relative targets are taken relative to `root`. The check is done on
/// canonical paths, so `..` segments and symlinks cannot escape the root.
pub fn resolve_in_workspace(root: &Path, target: &Path) -> DedupResult<PathBuf> {
    let root = root.canonicalize().map_err(|source| DedupError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    };

    let resolved = joined.canonicalize().map_err(|_| {
        DedupError::InputValidation(format!("file not found: {}", target.display()))
    })?;

    if !resolved.starts_with(&root) {
        return Err(DedupError::OutsideWorkspace(target.to_path_buf()));
    }
    if !resolved.is_file() {
        return Err(DedupError::InputValidation(format!(
            "not a file: {}",
            target.display()
        )));
    }

    Ok(resolved)
}

/// Workspace-relative identity of a resolved document, with `/` separators.
pub fn document_identity(root: &Path, resolved: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let relative = resolved.strip_prefix(&root).unwrap_or(resolved);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
