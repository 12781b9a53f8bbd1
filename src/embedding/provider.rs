// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Providers have an explicit lifecycle: construction is cheap, and the
//! expensive one-time setup (loading a model) happens in
//! [`EmbeddingProvider::initialize`]. The engine initializes a provider only
//! when an evaluation actually needs vectors.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::borrow::Cow;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::config::{EmbeddingConfig, EmbeddingProviderType};

const DEFAULT_FASTEMBED_MODEL: &str = "minilm";
const DEFAULT_FASTEMBED_BATCH_SIZE: usize = 512;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
const DEFAULT_FASTEMBED_MAX_CHARS: usize = 2000;
const DEFAULT_COMMAND_BATCH_SIZE: usize = 64;
const DEFAULT_HASHING_DIM: usize = 256;

/// Trait for embedding providers.
///
/// Implementations must be deterministic for identical input and model
/// identity. Cached vectors are tagged with [`EmbeddingProvider::model_id`].
pub trait EmbeddingProvider {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Whether [`EmbeddingProvider::initialize`] has completed.
    fn is_ready(&self) -> bool;

    /// Performs one-time setup. Calling it on a ready provider is a no-op.
    fn initialize(&mut self) -> Result<()>;

    /// Generates embeddings for the given texts.
    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn initialize(&mut self) -> Result<()> {
        (**self).initialize()
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_texts(texts)
    }
}

/// Creates the provider selected in the `[embeddings]` config section.
///
/// The returned provider is not yet initialized.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider() {
        EmbeddingProviderType::Builtin => {
            let mut provider_config = EmbeddingProviderConfig::from_env()?;
            if let Some(batch_size) = config.batch_size {
                provider_config.batch_size = batch_size.clamp(1, MAX_FASTEMBED_BATCH_SIZE);
            }
            Ok(Box::new(FastEmbedder::new(provider_config)))
        }
        EmbeddingProviderType::Command => {
            let mut provider =
                CommandProvider::new(config.command().to_string(), config.model().to_string());
            if let Some(batch_size) = config.batch_size {
                provider.batch_size = batch_size.max(1);
            }
            Ok(Box::new(provider))
        }
        EmbeddingProviderType::Hashing => Ok(Box::new(HashingProvider::new(DEFAULT_HASHING_DIM))),
    }
}

/// Configuration for the builtin fastembed provider.
#[derive(Debug, Clone)]
pub struct EmbeddingProviderConfig {
    #[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
    pub model: EmbeddingModel,
    pub batch_size: usize,
    pub max_chars: usize,
    pub normalize: bool,
}

impl EmbeddingProviderConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        #[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
        {
            config.model = parse_model_env()?;
        }

        let mut batch_size = parse_usize_env("FASTEMBED_BATCH_SIZE", DEFAULT_FASTEMBED_BATCH_SIZE)?;
        if batch_size == 0 {
            batch_size = DEFAULT_FASTEMBED_BATCH_SIZE;
        }
        if batch_size > MAX_FASTEMBED_BATCH_SIZE {
            tracing::warn!(
                "FASTEMBED_BATCH_SIZE={} exceeds max {}; clamping",
                batch_size,
                MAX_FASTEMBED_BATCH_SIZE
            );
            batch_size = MAX_FASTEMBED_BATCH_SIZE;
        }
        config.batch_size = batch_size;

        let max_chars = parse_usize_env("FASTEMBED_MAX_CHARS", DEFAULT_FASTEMBED_MAX_CHARS)?;
        if max_chars > 0 {
            config.max_chars = max_chars;
        }

        config.normalize = parse_bool_env("FASTEMBED_NORMALIZE", true)?;
        Ok(config)
    }
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            #[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
            model: EmbeddingModel::AllMiniLML6V2,
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
            max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
            normalize: true,
        }
    }
}

/// FastEmbed provider using sentence-transformers/all-MiniLM-L6-v2.
///
/// The model (~85MB, downloaded on first use) is loaded by `initialize`.
pub struct FastEmbedder {
    #[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
    embedder: Option<TextEmbedding>,
    config: EmbeddingProviderConfig,
    model_id: String,
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
impl FastEmbedder {
    pub fn new(config: EmbeddingProviderConfig) -> Self {
        let model_id = config.model.to_string();
        Self {
            embedder: None,
            config,
            model_id,
        }
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn is_ready(&self) -> bool {
        self.embedder.is_some()
    }

    fn initialize(&mut self) -> Result<()> {
        if self.embedder.is_some() {
            return Ok(());
        }
        tracing::info!(model = %self.model_id, "loading embedding model");
        let init = InitOptions::new(self.config.model.clone());
        let embedder =
            TextEmbedding::try_new(init).context("Failed to initialize fastembed model")?;
        self.embedder = Some(embedder);
        tracing::info!(model = %self.model_id, "embedding model loaded");
        Ok(())
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let Some(embedder) = self.embedder.as_mut() else {
            bail!("fastembed provider used before initialize()");
        };

        let prepared = truncate_texts(texts, self.config.max_chars);
        let mut embeddings = embedder.embed(&prepared, Some(self.config.batch_size))?;

        if self.config.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
impl FastEmbedder {
    pub fn new(config: EmbeddingProviderConfig) -> Self {
        Self {
            config,
            model_id: "unavailable".to_string(),
        }
    }
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn initialize(&mut self) -> Result<()> {
        bail!("builtin embedding provider is not available on this platform; use provider = \"command\"")
    }

    fn embed_texts(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("builtin embedding provider is not available on this platform")
    }
}

/// Command provider that shells out to an external process.
///
/// Writes `{"model": ..., "texts": [...]}` to stdin and expects a JSON array
/// of vectors (or an object with `embeddings`, `vectors` or `data`) on stdout.
pub struct CommandProvider {
    command: String,
    model: String,
    batch_size: usize,
}

impl CommandProvider {
    pub fn new(command: String, model: String) -> Self {
        Self {
            command,
            model,
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
        }
    }

    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload_str = payload.to_string();
            stdin
                .write_all(payload_str.as_bytes())
                .context("Failed to write embeddings payload to stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_command_output(stdout.trim())
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_command(texts)
    }
}

fn parse_command_output(raw: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(raw)
        .with_context(|| "Failed to parse embeddings command output as JSON")?;

    let embeddings_value = match parsed {
        Value::Array(arr) => Value::Array(arr),
        Value::Object(ref obj) => {
            if let Some(value) = obj.get("embeddings") {
                value.clone()
            } else if let Some(value) = obj.get("vectors") {
                value.clone()
            } else if let Some(value) = obj.get("data") {
                value.clone()
            } else {
                bail!("Embeddings command output missing 'embeddings' field");
            }
        }
        _ => bail!("Embeddings command output must be JSON array or object"),
    };

    embeddings_value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Embeddings output must be a JSON array"))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                        .map(|v| v as f32)
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect::<Result<Vec<Vec<f32>>>>()
}

/// Offline provider based on feature hashing of word tokens.
///
/// Deterministic and model-free, so it is suited to tests and air-gapped use.
/// It only captures lexical overlap, not meaning.
pub struct HashingProvider {
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HashingProvider {
    /// Creates a new hashing provider with specified dimension.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            model: format!("hashing-bow-{}", dimension),
            dimension,
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let mut tokens = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .peekable();

        if tokens.peek().is_none() {
            // Punctuation-only input still needs a non-zero vector.
            self.add_feature(&mut vector, lowered.trim());
        }
        for token in tokens {
            self.add_feature(&mut vector, token);
        }

        l2_normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let bucket = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]) as usize
            % self.dimension;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

impl EmbeddingProvider for HashingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn truncate_texts<'a>(texts: &'a [String], max_chars: usize) -> Vec<Cow<'a, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars<'a>(input: &'a str, max_chars: usize) -> Cow<'a, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    let mut count = 0;
    for (idx, _) in input.char_indices() {
        if count == max_chars {
            return Cow::Owned(input[..idx].to_string());
        }
        count += 1;
    }

    Cow::Borrowed(input)
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
fn parse_model_env() -> Result<EmbeddingModel> {
    let raw = env::var("FASTEMBED_MODEL").unwrap_or_else(|_| DEFAULT_FASTEMBED_MODEL.to_string());
    let value = raw.trim();
    if value.is_empty() {
        return Ok(EmbeddingModel::AllMiniLML6V2);
    }

    match value.to_lowercase().as_str() {
        "minilm"
        | "all-minilm-l6-v2"
        | "allminilm-l6-v2"
        | "sentence-transformers/all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        other => bail!(
            "Unsupported FASTEMBED_MODEL '{}'. Supported value: {}",
            other,
            DEFAULT_FASTEMBED_MODEL
        ),
    }
}

fn parse_usize_env(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid {} value: {}", name, value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim().to_lowercase();
            if value.is_empty() {
                return Ok(default);
            }
            match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => bail!("Invalid {} value: {}", name, other),
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_hashing_provider_is_deterministic_and_normalized() {
        let mut provider = HashingProvider::new(64);
        assert_eq!(provider.model_id(), "hashing-bow-64");
        assert!(provider.is_ready());

        let result = provider
            .embed_texts(&["hello world".to_string(), "hello world".to_string()])
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].len(), 64);
        assert_eq!(result[0], result[1]);
        assert!((norm(&result[0]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_provider_ignores_case_and_punctuation() {
        let mut provider = HashingProvider::new(128);
        let a = provider.embed_one("Keep entries short.").unwrap();
        let b = provider.embed_one("keep ENTRIES short").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hashing_provider_punctuation_only_is_nonzero() {
        let mut provider = HashingProvider::new(32);
        let vector = provider.embed_one("***").unwrap();
        assert!((norm(&vector) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_embed() {
        let mut provider = HashingProvider::new(16);
        let result = provider.embed_texts(&[]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_boxed_provider_delegates() {
        let mut provider: Box<dyn EmbeddingProvider> = Box::new(HashingProvider::new(8));
        provider.initialize().unwrap();
        assert_eq!(provider.model_id(), "hashing-bow-8");
        assert_eq!(provider.embed_one("x").unwrap().len(), 8);
    }

    #[test]
    fn test_parse_command_output_shapes() {
        assert_eq!(
            parse_command_output("[[1, 0.5]]").unwrap(),
            vec![vec![1.0, 0.5]]
        );
        assert_eq!(
            parse_command_output(r#"{"embeddings": [[0.25]]}"#).unwrap(),
            vec![vec![0.25]]
        );
        assert!(parse_command_output(r#"{"other": []}"#).is_err());
        assert!(parse_command_output(r#"[["x"]]"#).is_err());
        assert!(parse_command_output("not json").is_err());
    }

    #[test]
    fn test_truncate_to_chars() {
        let input = "hello";
        assert_eq!(
            truncate_to_chars(input, 2),
            Cow::<str>::Owned("he".to_string())
        );
        assert_eq!(truncate_to_chars(input, 5), Cow::Borrowed(input));
    }
}
