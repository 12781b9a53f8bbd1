// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON file cache backend.
//!
//! One entry per section, stored in `.mddedup/cache/embeddings/<hash>.json`.
//! Writes go to a temporary file that is renamed over the target, so readers
//! only ever observe a complete entry.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::embedding::cache::{CacheEntry, CacheEntrySummary, CacheKey, CacheStore, ClearScope};
use crate::utils::{CACHE_DIR, WORKSPACE_DIR};

/// Directory-backed cache store.
pub struct JsonFileStore {
    cache_dir: PathBuf,
}

impl JsonFileStore {
    /// Uses `cache_dir` as-is. The directory is created on first write.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    /// Store under the default location for a workspace.
    pub fn open_default<P: AsRef<Path>>(workspace_root: P) -> Self {
        Self::new(
            workspace_root
                .as_ref()
                .join(WORKSPACE_DIR)
                .join(CACHE_DIR)
                .join("embeddings"),
        )
    }

    /// Returns the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key.hash()))
    }

    fn read_entry(path: &Path) -> Result<CacheEntry> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache: {}", path.display()))
    }

    fn json_files(&self) -> Result<Vec<PathBuf>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_entry(&path).map(Some)
    }

    fn store(&mut self, entry: &CacheEntry) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!(
                "Failed to create cache directory: {}",
                self.cache_dir.display()
            )
        })?;

        let path = self.entry_path(&entry.key);
        let tmp_path = path.with_extension(format!("json.tmp.{}", std::process::id()));
        let json = serde_json::to_string(entry).context("Failed to serialize cache entry")?;

        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write cache: {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("Failed to replace cache: {}", path.display()));
        }

        Ok(())
    }

    fn clear(&mut self, scope: &ClearScope) -> Result<usize> {
        if let ClearScope::Section(key) = scope {
            let path = self.entry_path(key);
            if !path.exists() {
                return Ok(0);
            }
            match Self::read_entry(&path) {
                Ok(entry) if entry.key == *key => {}
                Ok(_) => return Ok(0),
                Err(err) => {
                    tracing::debug!("skipping unreadable cache file: {:#}", err);
                    return Ok(0);
                }
            }
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache: {}", path.display()))?;
            return Ok(1);
        }

        let mut count = 0;
        for path in self.json_files()? {
            let remove = match scope {
                ClearScope::All => true,
                _ => match Self::read_entry(&path) {
                    Ok(entry) => scope.matches(&entry.key),
                    Err(err) => {
                        tracing::debug!("skipping unreadable cache file: {:#}", err);
                        false
                    }
                },
            };
            if remove {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove cache: {}", path.display()))?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn entries(&self) -> Result<Vec<CacheEntrySummary>> {
        let mut summaries = Vec::new();
        for path in self.json_files()? {
            match Self::read_entry(&path) {
                Ok(entry) => {
                    let mut summary = CacheEntrySummary::from(&entry);
                    summary.bytes = fs::metadata(&path).ok().map(|m| m.len());
                    summaries.push(summary);
                }
                Err(err) => tracing::debug!("skipping unreadable cache file: {:#}", err),
            }
        }
        Ok(summaries)
    }
}
