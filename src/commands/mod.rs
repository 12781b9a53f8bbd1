// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations for the mddedup binary

pub mod cache_stats;
pub mod check;
pub mod clear_cache;

use std::path::{Path, PathBuf};

/// Resolves a command-line path against the current directory.
pub(crate) fn from_cwd(cwd: &Path, path: &str) -> PathBuf {
    cwd.join(path)
}
