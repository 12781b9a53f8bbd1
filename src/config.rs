// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for mddedup
//!
//! Loads configuration from .mddeduprc.toml in current directory or ~/.config/mddedup/config.toml

use serde::Deserialize;
use std::path::PathBuf;

use crate::engine::Thresholds;
use crate::errors::DedupError;

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// fastembed with all-MiniLM-L6-v2
    #[default]
    Builtin,
    Command,
    /// Offline feature hashing; lexical overlap only
    Hashing,
}

/// Cache persistence backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// One JSON file per section
    #[default]
    Json,
    Sqlite,
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, hashing)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier reported by the command provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Texts per provider call
    pub batch_size: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "local-model-id")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("local-model-id")
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }
}

/// Deduplication thresholds and defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Similarity at or above which a match is a duplicate
    pub duplicate_threshold: Option<f32>,
    /// Similarity at or above which a match is related
    pub related_threshold: Option<f32>,
    /// Matches below this similarity are dropped
    pub relevance_floor: Option<f32>,
    /// Maximum number of ranked matches to report
    pub max_matches: Option<usize>,
    /// Document checked when none is given on the command line
    pub default_file: Option<String>,
    /// Section checked when none is given on the command line
    pub default_section: Option<String>,
}

impl DedupConfig {
    /// Builds validated thresholds, falling back to defaults for unset values.
    pub fn thresholds(&self) -> Result<Thresholds, DedupError> {
        let defaults = Thresholds::default();
        Thresholds::new(
            self.duplicate_threshold.unwrap_or(defaults.duplicate),
            self.related_threshold.unwrap_or(defaults.related),
            self.relevance_floor.unwrap_or(defaults.floor),
        )
    }

    /// Get max matches (defaults to 5)
    pub fn max_matches(&self) -> usize {
        self.max_matches.unwrap_or(5).max(1)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether embeddings are persisted between runs
    pub enabled: Option<bool>,
    /// Persistence backend (json, sqlite)
    pub backend: Option<CacheBackend>,
}

impl CacheConfig {
    /// Get enabled (defaults to true)
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Get backend (defaults to Json)
    pub fn backend(&self) -> CacheBackend {
        self.backend.unwrap_or_default()
    }
}

/// Configuration loaded from .mddeduprc.toml or ~/.config/mddedup/config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output format (text or json)
    pub default_format: Option<String>,

    /// Embedding configuration
    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    /// Deduplication configuration
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .mddeduprc.toml in current directory
    /// 2. ~/.config/mddedup/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(&PathBuf::from(".mddeduprc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("mddedup").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match Self::parse(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Whether the config asks for JSON output
    pub fn wants_json(&self) -> bool {
        self.default_format
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    /// Get the embedding configuration
    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    /// Get the dedup configuration
    pub fn dedup(&self) -> &DedupConfig {
        &self.dedup
    }

    /// Get the cache configuration
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }
}
