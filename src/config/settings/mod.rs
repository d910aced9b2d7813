
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::index::SimilarityMetric;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection settings for the embedding model endpoint (Ollama protocol).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub dimension: u32,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// Connection settings for the generation model endpoint (Ollama protocol).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.1:latest".to_string(),
        }
    }
}

/// Sliding-window chunking parameters, in tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap_tokens: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    pub metric: SimilarityMetric,
    /// Token budget for neighbor-chunk context expansion during synthesis.
    pub context_budget_tokens: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.35,
            metric: SimilarityMetric::Cosine,
            context_budget_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum retry attempts for a ticket in the failed state.
    pub max_retries: u32,
    /// Maximum tickets processed concurrently.
    pub worker_count: usize,
    /// Categories offered to the classification model.
    pub categories: Vec<String>,
}

impl Default for ResolverConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_retries: 3,
            worker_count: 4,
            categories: vec![
                "hardware".to_string(),
                "software".to_string(),
                "billing".to_string(),
                "account".to_string(),
                "other".to_string(),
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max tokens: {0} (must be between 1 and 8192)")]
    InvalidMaxTokens(usize),
    #[error("Overlap tokens ({0}) must be less than max tokens ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid score threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidScoreThreshold(f32),
    #[error("Invalid worker count: {0} (must be between 1 and 64)")]
    InvalidWorkerCount(usize),
    #[error("Category list cannot be empty")]
    EmptyCategories,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(
            &self.embedding.protocol,
            &self.embedding.host,
            self.embedding.port,
            &self.embedding.model,
        )?;
        validate_endpoint(
            &self.generation.protocol,
            &self.generation.host,
            self.generation.port,
            &self.generation.model,
        )?;

        if self.embedding.batch_size == 0 || self.embedding.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }

        if !(64..=4096).contains(&self.embedding.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }

        if self.chunking.max_tokens == 0 || self.chunking.max_tokens > 8192 {
            return Err(ConfigError::InvalidMaxTokens(self.chunking.max_tokens));
        }

        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            return Err(ConfigError::OverlapTooLarge(
                self.chunking.overlap_tokens,
                self.chunking.max_tokens,
            ));
        }

        if self.retrieval.top_k == 0 || self.retrieval.top_k > 100 {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(ConfigError::InvalidScoreThreshold(
                self.retrieval.score_threshold,
            ));
        }

        if self.resolver.worker_count == 0 || self.resolver.worker_count > 64 {
            return Err(ConfigError::InvalidWorkerCount(self.resolver.worker_count));
        }

        if self.resolver.categories.is_empty() {
            return Err(ConfigError::EmptyCategories);
        }

        Ok(())
    }

    /// Default base directory under the platform config dir.
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir()
            .ok_or(ConfigError::DirectoryError)?
            .join("ragdesk");
        Ok(dir)
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    /// Path of the persisted vector index snapshot.
    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.json")
    }

    /// Path of the query/answer history log.
    #[inline]
    pub fn history_path(&self) -> PathBuf {
        self.base_dir.join("history.json")
    }

    #[inline]
    pub fn embedding_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(
            &self.embedding.protocol,
            &self.embedding.host,
            self.embedding.port,
        )
    }

    #[inline]
    pub fn generation_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(
            &self.generation.protocol,
            &self.generation.host,
            self.generation.port,
        )
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            resolver: ResolverConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

fn validate_endpoint(
    protocol: &str,
    host: &str,
    port: u16,
    model: &str,
) -> Result<(), ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }

    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }

    endpoint_url(protocol, host, port)?;

    if model.trim().is_empty() {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }

    Ok(())
}

fn endpoint_url(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
}
