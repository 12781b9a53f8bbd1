// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed embedding cache for document sections.
//!
//! One entry per (document, section) pair. An entry is trusted only when its
//! content hash, line count, provider identity and vector shapes all match the
//! current section; otherwise every vector is recomputed and the entry is
//! replaced as a whole.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::embedding::EmbeddingProvider;
use crate::errors::{DedupError, DedupResult};
use crate::section::SectionLine;
use crate::similarity::vector_norm;

/// Bumped whenever the persisted record layout changes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Identifies the cache entry for one section of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Stable document identity (workspace-relative path for files)
    pub document: String,
    /// Section name as requested by the caller
    pub section: String,
}

impl CacheKey {
    pub fn new(document: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            section: section.into(),
        }
    }

    /// Generate a stable hash from the key, usable as a file name
    pub fn hash(&self) -> String {
        // Length prefix keeps `("a:b", "c")` and `("a", "b:c")` apart.
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.document.len() as u64).to_le_bytes());
        hasher.update(self.document.as_bytes());
        hasher.update(self.section.as_bytes());
        hasher.finalize().to_hex()[..32].to_string()
    }
}

/// One embedded section line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedEmbedding {
    pub text: String,
    /// 1-indexed line number at the time of extraction
    pub source_line: usize,
    pub vector: Vec<f32>,
}

/// Persisted embeddings for one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub key: CacheKey,
    /// Provider model identifier that produced the vectors
    pub provider: String,
    /// Hash of the section line texts joined by newlines
    pub content_hash: String,
    /// Unix epoch milliseconds of the last recomputation
    pub updated_at: u64,
    pub embeddings: Vec<CachedEmbedding>,
}

/// Why a stored entry was not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    SchemaVersion,
    KeyMismatch,
    ProviderChanged,
    ContentChanged,
    CountMismatch,
    MalformedVector,
}

impl CacheEntry {
    /// Checks the entry against the current section before any of it is used.
    pub fn validate(
        &self,
        key: &CacheKey,
        content_hash: &str,
        line_count: usize,
        provider: &str,
    ) -> std::result::Result<(), Staleness> {
        if self.schema_version != CACHE_SCHEMA_VERSION {
            return Err(Staleness::SchemaVersion);
        }
        if &self.key != key {
            return Err(Staleness::KeyMismatch);
        }
        if self.provider != provider {
            return Err(Staleness::ProviderChanged);
        }
        if self.content_hash != content_hash {
            return Err(Staleness::ContentChanged);
        }
        if self.embeddings.len() != line_count {
            return Err(Staleness::CountMismatch);
        }

        let dimension = self.embeddings.first().map(|e| e.vector.len()).unwrap_or(0);
        let malformed = self
            .embeddings
            .iter()
            .any(|e| e.vector.len() != dimension || vector_norm(&e.vector).is_err());
        if malformed {
            return Err(Staleness::MalformedVector);
        }

        Ok(())
    }
}

/// Hashes the section content for staleness detection.
pub fn content_hash(lines: &[SectionLine]) -> String {
    let joined = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    blake3::hash(joined.as_bytes()).to_hex().to_string()
}

/// Which entries a clear operation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    All,
    /// Every section of one document
    Document(String),
    Section(CacheKey),
}

impl ClearScope {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            ClearScope::All => true,
            ClearScope::Document(document) => &key.document == document,
            ClearScope::Section(section_key) => section_key == key,
        }
    }
}

/// Lightweight description of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntrySummary {
    pub key: CacheKey,
    pub provider: String,
    pub line_count: usize,
    pub updated_at: u64,
    /// Size on disk, when the backend can tell
    pub bytes: Option<u64>,
}

impl From<&CacheEntry> for CacheEntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            provider: entry.provider.clone(),
            line_count: entry.embeddings.len(),
            updated_at: entry.updated_at,
            bytes: None,
        }
    }
}

/// Key-value persistence for cache entries.
///
/// `store` must be atomic: after a failed or interrupted call the previous
/// entry (or its absence) is still what `load` returns.
pub trait CacheStore {
    /// Loads the entry for a key. An error means the stored data is unreadable
    /// and is treated as absent by the cache.
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Replaces the entry for `entry.key`.
    fn store(&mut self, entry: &CacheEntry) -> Result<()>;

    /// Removes matching entries and returns how many were removed.
    fn clear(&mut self, scope: &ClearScope) -> Result<usize>;

    /// Lists readable entries.
    fn entries(&self) -> Result<Vec<CacheEntrySummary>>;
}

impl<S: CacheStore + ?Sized> CacheStore for Box<S> {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        (**self).load(key)
    }

    fn store(&mut self, entry: &CacheEntry) -> Result<()> {
        (**self).store(entry)
    }

    fn clear(&mut self, scope: &ClearScope) -> Result<usize> {
        (**self).clear(scope)
    }

    fn entries(&self) -> Result<Vec<CacheEntrySummary>> {
        (**self).entries()
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(&key.hash()).cloned())
    }

    fn store(&mut self, entry: &CacheEntry) -> Result<()> {
        self.entries.insert(entry.key.hash(), entry.clone());
        Ok(())
    }

    fn clear(&mut self, scope: &ClearScope) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !scope.matches(&entry.key));
        Ok(before - self.entries.len())
    }

    fn entries(&self) -> Result<Vec<CacheEntrySummary>> {
        let mut summaries: Vec<CacheEntrySummary> =
            self.entries.values().map(CacheEntrySummary::from).collect();
        summaries.sort_by(|a, b| {
            a.key
                .document
                .cmp(&b.key.document)
                .then_with(|| a.key.section.cmp(&b.key.section))
        });
        Ok(summaries)
    }
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    /// No entry, or the stored one could not be read
    Miss,
    Stale(Staleness),
}

/// Embeddings for the current section plus how they were obtained.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub embeddings: Vec<CachedEmbedding>,
    pub status: CacheStatus,
}

/// Section embedding cache over a [`CacheStore`].
pub struct VectorCache<S> {
    store: S,
}

impl<S: CacheStore> VectorCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Returns vectors for `lines`, recomputing the whole section when the
    /// stored entry is absent, unreadable or stale.
    ///
    /// Provider errors leave the store untouched. A failed write after a
    /// successful recomputation is logged and the fresh vectors are returned.
    pub fn get_or_compute<P: EmbeddingProvider + ?Sized>(
        &mut self,
        key: &CacheKey,
        lines: &[SectionLine],
        provider: &mut P,
    ) -> DedupResult<CacheLookup> {
        let hash = content_hash(lines);

        let status = match self.store.load(key) {
            Ok(Some(entry)) => {
                match entry.validate(key, &hash, lines.len(), provider.model_id()) {
                    Ok(()) => {
                        tracing::debug!(key = %key.hash(), "embedding cache hit");
                        // Texts are identical; line numbers may have shifted.
                        let embeddings = entry
                            .embeddings
                            .into_iter()
                            .zip(lines)
                            .map(|(cached, line)| CachedEmbedding {
                                text: line.text.clone(),
                                source_line: line.source_line,
                                vector: cached.vector,
                            })
                            .collect();
                        return Ok(CacheLookup {
                            embeddings,
                            status: CacheStatus::Hit,
                        });
                    }
                    Err(reason) => {
                        tracing::debug!(key = %key.hash(), ?reason, "embedding cache stale");
                        CacheStatus::Stale(reason)
                    }
                }
            }
            Ok(None) => CacheStatus::Miss,
            Err(err) => {
                tracing::warn!(
                    key = %key.hash(),
                    "discarding unreadable cache entry: {:#}",
                    err
                );
                CacheStatus::Miss
            }
        };

        let embeddings = embed_lines(lines, provider)?;
        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            key: key.clone(),
            provider: provider.model_id().to_string(),
            content_hash: hash,
            updated_at: now_millis(),
            embeddings,
        };

        tracing::info!(
            document = %key.document,
            section = %key.section,
            lines = entry.embeddings.len(),
            "recomputed section embeddings"
        );

        if let Err(err) = self.store.store(&entry) {
            tracing::warn!(key = %key.hash(), "failed to persist cache entry: {:#}", err);
        }

        Ok(CacheLookup {
            embeddings: entry.embeddings,
            status,
        })
    }

    /// Removes matching entries. Clearing an empty cache succeeds with 0.
    pub fn clear(&mut self, scope: &ClearScope) -> Result<usize> {
        self.store.clear(scope)
    }
}

/// Embeds every line in provider-sized batches and checks the provider kept
/// its contract (one finite, non-zero vector per text, fixed dimension).
pub fn embed_lines<P: EmbeddingProvider + ?Sized>(
    lines: &[SectionLine],
    provider: &mut P,
) -> DedupResult<Vec<CachedEmbedding>> {
    let batch_size = provider.batch_size().max(1);
    let mut embeddings = Vec::with_capacity(lines.len());
    let mut dimension: Option<usize> = None;

    for batch in lines.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|line| line.text.clone()).collect();
        let vectors = provider.embed_texts(&texts).map_err(DedupError::provider)?;
        if vectors.len() != batch.len() {
            return Err(DedupError::ProviderFailure(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        for (line, vector) in batch.iter().zip(vectors) {
            check_vector(&vector, &mut dimension).map_err(|reason| {
                DedupError::ProviderFailure(format!(
                    "bad embedding for line {}: {}",
                    line.source_line, reason
                ))
            })?;
            embeddings.push(CachedEmbedding {
                text: line.text.clone(),
                source_line: line.source_line,
                vector,
            });
        }
    }

    Ok(embeddings)
}

/// Validates a provider vector, pinning the expected dimension on first use.
pub(crate) fn check_vector(
    vector: &[f32],
    dimension: &mut Option<usize>,
) -> std::result::Result<(), String> {
    vector_norm(vector).map_err(|e| e.to_string())?;
    match *dimension {
        Some(expected) if expected != vector.len() => Err(format!(
            "dimension {} differs from {}",
            vector.len(),
            expected
        )),
        Some(_) => Ok(()),
        None => {
            *dimension = Some(vector.len());
            Ok(())
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;

    /// Counts texts embedded and can be told to fail.
    struct CountingProvider {
        inner: HashingProvider,
        embedded: usize,
        fail: bool,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                inner: HashingProvider::new(32),
                embedded: 0,
                fail: false,
            }
        }
    }

    impl EmbeddingProvider for CountingProvider {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn batch_size(&self) -> usize {
            2
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("model exploded");
            }
            self.embedded += texts.len();
            self.inner.embed_texts(texts)
        }
    }

    fn lines(texts: &[&str]) -> Vec<SectionLine> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| SectionLine {
                text: text.to_string(),
                source_line: i + 10,
            })
            .collect()
    }

    #[test]
    fn test_cache_key_hash() {
        let key1 = CacheKey::new("learn.md", "Rules");
        let key2 = CacheKey::new("learn.md", "Rules");
        let key3 = CacheKey::new("learn.md", "Other");

        assert_eq!(key1.hash(), key2.hash());
        assert_ne!(key1.hash(), key3.hash());
        assert_eq!(key1.hash().len(), 32);
    }

    #[test]
    fn test_cache_key_hash_separates_colons() {
        let left = CacheKey::new("a:b", "c");
        let right = CacheKey::new("a", "b:c");
        assert_ne!(left.hash(), right.hash());
    }

    #[test]
    fn test_second_lookup_is_a_hit() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let mut provider = CountingProvider::new();
        let key = CacheKey::new("doc.md", "Rules");
        let current = lines(&["one", "two", "three"]);

        let first = cache.get_or_compute(&key, &current, &mut provider).unwrap();
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(provider.embedded, 3);

        let second = cache.get_or_compute(&key, &current, &mut provider).unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(provider.embedded, 3);
        assert_eq!(first.embeddings, second.embeddings);
    }

    #[test]
    fn test_single_line_change_recomputes_everything() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let mut provider = CountingProvider::new();
        let key = CacheKey::new("doc.md", "Rules");

        cache
            .get_or_compute(&key, &lines(&["one", "two", "three"]), &mut provider)
            .unwrap();
        let before = cache.store().load(&key).unwrap().unwrap();

        let lookup = cache
            .get_or_compute(&key, &lines(&["one", "TWO!", "three"]), &mut provider)
            .unwrap();
        assert_eq!(lookup.status, CacheStatus::Stale(Staleness::ContentChanged));
        assert_eq!(provider.embedded, 6);

        let after = cache.store().load(&key).unwrap().unwrap();
        assert_ne!(before.content_hash, after.content_hash);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.embeddings[1].text, "TWO!");
    }

    #[test]
    fn test_hit_refreshes_line_numbers() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let mut provider = CountingProvider::new();
        let key = CacheKey::new("doc.md", "Rules");

        cache
            .get_or_compute(&key, &lines(&["one", "two"]), &mut provider)
            .unwrap();

        let mut shifted = lines(&["one", "two"]);
        for line in shifted.iter_mut() {
            line.source_line += 4;
        }
        let lookup = cache.get_or_compute(&key, &shifted, &mut provider).unwrap();
        assert_eq!(lookup.status, CacheStatus::Hit);
        assert_eq!(lookup.embeddings[0].source_line, 14);
        assert_eq!(lookup.embeddings[1].source_line, 15);
    }

    #[test]
    fn test_provider_change_invalidates() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let key = CacheKey::new("doc.md", "Rules");
        let current = lines(&["one"]);

        cache
            .get_or_compute(&key, &current, &mut HashingProvider::new(16))
            .unwrap();
        let lookup = cache
            .get_or_compute(&key, &current, &mut HashingProvider::new(24))
            .unwrap();

        assert_eq!(lookup.status, CacheStatus::Stale(Staleness::ProviderChanged));
        assert_eq!(lookup.embeddings[0].vector.len(), 24);
    }

    #[test]
    fn test_provider_failure_leaves_previous_entry() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let mut provider = CountingProvider::new();
        let key = CacheKey::new("doc.md", "Rules");

        cache
            .get_or_compute(&key, &lines(&["one", "two", "three"]), &mut provider)
            .unwrap();
        let before = cache.store().load(&key).unwrap().unwrap();

        provider.fail = true;
        let err = cache
            .get_or_compute(&key, &lines(&["changed", "two", "three"]), &mut provider)
            .unwrap_err();
        assert!(matches!(err, DedupError::ProviderFailure(_)));

        let after = cache.store().load(&key).unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_provider_failure_on_first_build_stores_nothing() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let mut provider = CountingProvider::new();
        provider.fail = true;

        let key = CacheKey::new("doc.md", "Rules");
        assert!(cache
            .get_or_compute(&key, &lines(&["one"]), &mut provider)
            .is_err());
        assert!(cache.store().is_empty());
    }

    #[test]
    fn test_malformed_stored_vectors_are_rebuilt() {
        let mut store = MemoryStore::new();
        let key = CacheKey::new("doc.md", "Rules");
        let current = lines(&["one", "two"]);
        let provider_id = HashingProvider::new(8).model_id().to_string();

        store
            .store(&CacheEntry {
                schema_version: CACHE_SCHEMA_VERSION,
                key: key.clone(),
                provider: provider_id,
                content_hash: content_hash(&current),
                updated_at: 0,
                embeddings: vec![
                    CachedEmbedding {
                        text: "one".to_string(),
                        source_line: 10,
                        vector: vec![0.0; 8],
                    },
                    CachedEmbedding {
                        text: "two".to_string(),
                        source_line: 11,
                        vector: vec![1.0; 8],
                    },
                ],
            })
            .unwrap();

        let mut cache = VectorCache::new(store);
        let lookup = cache
            .get_or_compute(&key, &current, &mut HashingProvider::new(8))
            .unwrap();
        assert_eq!(lookup.status, CacheStatus::Stale(Staleness::MalformedVector));
        assert!(cache.store().load(&key).unwrap().unwrap().updated_at > 0);
    }

    #[test]
    fn test_embed_lines_rejects_zero_vectors() {
        struct ZeroProvider;

        impl EmbeddingProvider for ZeroProvider {
            fn model_id(&self) -> &str {
                "zero"
            }
            fn batch_size(&self) -> usize {
                8
            }
            fn is_ready(&self) -> bool {
                true
            }
            fn initialize(&mut self) -> Result<()> {
                Ok(())
            }
            fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
            }
        }

        let err = embed_lines(&lines(&["one"]), &mut ZeroProvider).unwrap_err();
        assert!(matches!(err, DedupError::ProviderFailure(msg) if msg.contains("line 10")));
    }

    #[test]
    fn test_clear_scopes() {
        let mut cache = VectorCache::new(MemoryStore::new());
        let mut provider = HashingProvider::new(8);
        let current = lines(&["one"]);
        for (doc, section) in [("a.md", "X"), ("a.md", "Y"), ("b.md", "X")] {
            cache
                .get_or_compute(&CacheKey::new(doc, section), &current, &mut provider)
                .unwrap();
        }

        let removed = cache
            .clear(&ClearScope::Section(CacheKey::new("a.md", "Y")))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.clear(&ClearScope::Document("a.md".into())).unwrap(), 1);
        assert_eq!(cache.clear(&ClearScope::All).unwrap(), 1);
        assert_eq!(cache.clear(&ClearScope::All).unwrap(), 0);
    }
}
