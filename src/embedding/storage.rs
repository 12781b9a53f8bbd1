// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-based cache backend for section embeddings.
//!
//! Each cache entry is one row in `section_entries` plus one row per line in
//! `section_embeddings`. An entry is always replaced inside a single
//! transaction, so an interrupted write leaves the previous entry intact.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::embedding::cache::{
    CacheEntry, CacheEntrySummary, CacheKey, CacheStore, CachedEmbedding, ClearScope,
    CACHE_SCHEMA_VERSION,
};
use crate::utils::{CACHE_DIR, WORKSPACE_DIR};

/// SQLite-based storage for section embeddings.
///
/// Stores embeddings in `.mddedup/cache/embeddings.sqlite` by default.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Opens or creates a store at the specified path.
    ///
    /// A file that cannot be opened as a cache database is discarded and
    /// recreated empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        match Self::open_existing(&path) {
            Ok(store) => Ok(store),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    "discarding unreadable embedding cache: {:#}",
                    err
                );
                discard_database(&path)?;
                Self::open_existing(&path)
            }
        }
    }

    fn open_existing(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.init_schema()?;

        let version = store.get_meta("schema_version")?;
        match version.as_deref() {
            None => store.set_meta("schema_version", &CACHE_SCHEMA_VERSION.to_string())?,
            Some(v) if v == CACHE_SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                tracing::info!(found = v, "embedding cache schema changed; resetting");
                store.reset_schema()?;
            }
        }

        Ok(store)
    }

    /// Opens a store in the default location for a workspace.
    pub fn open_default<P: AsRef<Path>>(workspace_root: P) -> Result<Self> {
        let db_path = workspace_root
            .as_ref()
            .join(WORKSPACE_DIR)
            .join(CACHE_DIR)
            .join("embeddings.sqlite");
        Self::open(db_path)
    }

    /// Initializes the database schema if it does not exist.
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS section_entries (
                key_hash TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                section TEXT NOT NULL,
                provider TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_section_entries_document
                ON section_entries(document);

            CREATE TABLE IF NOT EXISTS section_embeddings (
                key_hash TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                source_line INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (key_hash, position)
            );
            "#,
            )
            .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Drops and recreates all tables.
    pub fn reset_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            DROP TABLE IF EXISTS section_embeddings;
            DROP TABLE IF EXISTS section_entries;
            DROP TABLE IF EXISTS meta;
            "#,
            )
            .context("Failed to reset embedding schema")?;

        self.init_schema()?;
        self.set_meta("schema_version", &CACHE_SCHEMA_VERSION.to_string())
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the storage connection explicitly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }

    /// Gets metadata value by key.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to get meta")?;
        Ok(value)
    }

    /// Sets metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Converts an embedding vector to a compact blob.
    fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Converts a blob back to an embedding vector.
    fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
        if blob.len() % 4 != 0 {
            bail!("embedding blob has {} bytes, not a multiple of 4", blob.len());
        }
        Ok(blob
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

impl CacheStore for SqliteStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let key_hash = key.hash();
        let header = self
            .conn
            .query_row(
                r#"
                SELECT document, section, provider, content_hash, schema_version, updated_at
                FROM section_entries
                WHERE key_hash = ?1
                "#,
                params![key_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query cache entry")?;

        let Some((document, section, provider, content_hash, schema_version, updated_at)) = header
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT text, source_line, embedding
            FROM section_embeddings
            WHERE key_hash = ?1
            ORDER BY position
            "#,
        )?;

        let rows = stmt
            .query_map(params![key_hash], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query cached embeddings")?;

        let embeddings = rows
            .into_iter()
            .map(|(text, source_line, blob)| {
                Ok(CachedEmbedding {
                    text,
                    source_line: source_line as usize,
                    vector: Self::blob_to_embedding(&blob)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(CacheEntry {
            schema_version: schema_version as u32,
            key: CacheKey::new(document, section),
            provider,
            content_hash,
            updated_at: updated_at as u64,
            embeddings,
        }))
    }

    fn store(&mut self, entry: &CacheEntry) -> Result<()> {
        let key_hash = entry.key.hash();
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM section_embeddings WHERE key_hash = ?1",
            params![key_hash],
        )?;

        tx.execute(
            r#"
            INSERT INTO section_entries (
                key_hash, document, section, provider, content_hash, schema_version, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(key_hash) DO UPDATE SET
                document = excluded.document,
                section = excluded.section,
                provider = excluded.provider,
                content_hash = excluded.content_hash,
                schema_version = excluded.schema_version,
                updated_at = excluded.updated_at
            "#,
            params![
                key_hash,
                entry.key.document,
                entry.key.section,
                entry.provider,
                entry.content_hash,
                entry.schema_version as i64,
                entry.updated_at as i64
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO section_embeddings (key_hash, position, text, source_line, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;

            for (position, embedding) in entry.embeddings.iter().enumerate() {
                let embedding_blob = Self::embedding_to_blob(&embedding.vector);
                stmt.execute(params![
                    key_hash,
                    position as i64,
                    embedding.text,
                    embedding.source_line as i64,
                    embedding_blob
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn clear(&mut self, scope: &ClearScope) -> Result<usize> {
        let tx = self.conn.transaction()?;

        let deleted = match scope {
            ClearScope::All => {
                tx.execute("DELETE FROM section_embeddings", [])?;
                tx.execute("DELETE FROM section_entries", [])?
            }
            ClearScope::Document(document) => {
                tx.execute(
                    r#"
                    DELETE FROM section_embeddings
                    WHERE key_hash IN (SELECT key_hash FROM section_entries WHERE document = ?1)
                    "#,
                    params![document],
                )?;
                tx.execute(
                    "DELETE FROM section_entries WHERE document = ?1",
                    params![document],
                )?
            }
            ClearScope::Section(key) => {
                let key_hash = key.hash();
                tx.execute(
                    "DELETE FROM section_embeddings WHERE key_hash = ?1",
                    params![key_hash],
                )?;
                tx.execute(
                    "DELETE FROM section_entries WHERE key_hash = ?1",
                    params![key_hash],
                )?
            }
        };

        tx.commit().context("Failed to clear embeddings")?;
        Ok(deleted)
    }

    fn entries(&self) -> Result<Vec<CacheEntrySummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT e.document, e.section, e.provider, e.updated_at,
                   (SELECT COUNT(*) FROM section_embeddings s WHERE s.key_hash = e.key_hash),
                   (SELECT COALESCE(SUM(LENGTH(s.embedding) + LENGTH(s.text)), 0)
                      FROM section_embeddings s WHERE s.key_hash = e.key_hash)
            FROM section_entries e
            ORDER BY e.document, e.section
            "#,
        )?;

        let summaries = stmt
            .query_map([], |row| {
                Ok(CacheEntrySummary {
                    key: CacheKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    provider: row.get(2)?,
                    updated_at: row.get::<_, i64>(3)? as u64,
                    line_count: row.get::<_, i64>(4)? as usize,
                    bytes: Some(row.get::<_, i64>(5)? as u64),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list cache entries")?;

        Ok(summaries)
    }
}

/// Removes a database file and its journal siblings; missing files are fine.
fn discard_database(path: &Path) -> Result<()> {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let mut target = path.as_os_str().to_os_string();
        target.push(suffix);
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to remove {}", Path::new(&target).display())
                })
            }
        }
    }
    Ok(())
}
