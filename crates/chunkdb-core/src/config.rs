//! Layered configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`,
//! `config.<env>.toml` and `APP_*` env vars (nested keys use `__`, e.g.
//! `APP_CHUNKING__SIMILARITY_THRESHOLD=0.6`). Components never read this
//! directly; callers extract an [`EngineConfig`] once and hand each
//! component its own immutable section.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::segmenter::DEFAULT_ABBREVIATIONS;

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    /// Load from the current working directory.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Load `config.toml` and the env-specific overlay from `dir`.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, env_name };
        config.engine()?;
        Ok(config)
    }

    /// Wrap an already assembled figment (tests, embedding callers).
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment, env_name: "custom".to_string() }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate every engine section.
    pub fn engine(&self) -> anyhow::Result<EngineConfig> {
        let engine: EngineConfig = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to parse engine configuration: {}", e))?;
        engine.validate()?;
        Ok(engine)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    #[default]
    Semantic,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    /// Minimum cosine similarity for a sentence to join the open chunk.
    pub similarity_threshold: f32,
    /// Soft character budget per chunk.
    pub target_chunk_size: usize,
    /// Only used by the fixed-window strategy.
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub abbreviations: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Semantic,
            similarity_threshold: 0.5,
            target_chunk_size: 1000,
            chunk_overlap: 50,
            embed_batch_size: 64,
            abbreviations: DEFAULT_ABBREVIATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::InvalidConfig(format!(
                "chunking.similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.target_chunk_size == 0 {
            return Err(Error::InvalidConfig("chunking.target_chunk_size must be >= 1".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::InvalidConfig("chunking.embed_batch_size must be >= 1".into()));
        }
        if self.strategy == ChunkingStrategy::Fixed && self.chunk_overlap >= self.target_chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunking.chunk_overlap ({}) must be smaller than target_chunk_size ({})",
                self.chunk_overlap, self.target_chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub default_weight_vector: f32,
    /// Hybrid queries pull `oversample_factor * top_k` ANN candidates.
    pub oversample_factor: usize,
    pub provider_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 100,
            default_weight_vector: 0.7,
            oversample_factor: 4,
            provider_timeout_ms: 30_000,
        }
    }
}

impl SearchConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_top_k == 0 || self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(Error::InvalidConfig(format!(
                "search.default_top_k ({}) must be within 1..=max_top_k ({})",
                self.default_top_k, self.max_top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.default_weight_vector) {
            return Err(Error::InvalidConfig("search.default_weight_vector must be within [0, 1]".into()));
        }
        if self.oversample_factor == 0 {
            return Err(Error::InvalidConfig("search.oversample_factor must be >= 1".into()));
        }
        if self.provider_timeout_ms == 0 {
            return Err(Error::InvalidConfig("search.provider_timeout_ms must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub use_fake: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            model_dir: None,
            max_len: 256,
            use_fake: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.max_len == 0 {
            return Err(Error::InvalidConfig("embedding.dimension and embedding.max_len must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub lancedb_dir: String,
    pub tantivy_dir: String,
    pub table_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lancedb_dir: "./data/lancedb".to_string(),
            tantivy_dir: "./data/tantivy".to_string(),
            table_name: "document_chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.search.validate()?;
        self.embedding.validate()
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
