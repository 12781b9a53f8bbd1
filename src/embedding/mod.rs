// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - providers and the section embedding cache
//!
//! Providers turn text into vectors; the cache keeps those vectors per
//! document section so unchanged sections are never re-embedded.

pub mod cache;
pub mod json_store;
pub mod provider;
pub mod storage;

pub use cache::{
    content_hash, CacheEntry, CacheEntrySummary, CacheKey, CacheLookup, CacheStatus, CacheStore,
    CachedEmbedding, ClearScope, MemoryStore, Staleness, VectorCache, CACHE_SCHEMA_VERSION,
};
pub use json_store::JsonFileStore;
pub use provider::{
    create_provider, CommandProvider, EmbeddingProvider, EmbeddingProviderConfig, FastEmbedder,
    HashingProvider,
};
pub use storage::SqliteStore;

use anyhow::Result;
use std::path::Path;

use crate::config::{CacheBackend, CacheConfig};

/// Opens the cache store selected in the `[cache]` config section.
///
/// With caching disabled, an in-memory store is used so nothing is persisted.
pub fn open_store(config: &CacheConfig, workspace_root: &Path) -> Result<Box<dyn CacheStore>> {
    if !config.enabled() {
        return Ok(Box::new(MemoryStore::new()));
    }

    match config.backend() {
        CacheBackend::Json => Ok(Box::new(JsonFileStore::open_default(workspace_root))),
        CacheBackend::Sqlite => Ok(Box::new(SqliteStore::open_default(workspace_root)?)),
    }
}
