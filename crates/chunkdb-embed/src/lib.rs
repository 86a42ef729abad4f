//! Embedding providers: a local BERT-family sentence encoder on candle and a
//! deterministic hashing embedder for tests and offline runs.
use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use chunkdb_core::config::EmbeddingConfig;
use chunkdb_core::traits::EmbeddingProvider;
use chunkdb_core::types::Embedding;
use chunkdb_core::{Error, Result};

pub mod device;
pub mod pool;
pub mod tokenize;

pub use pool::masked_mean_l2;

/// Mean-pooled, L2-normalised sentence embeddings from a BERT checkpoint
/// (all-MiniLM-L6-v2 by default).
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dim: usize,
    max_len: usize,
}

impl BertEmbedder {
    pub fn load(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_dir = resolve_model_dir(config)?;
        let device = device::select_device();
        info!(model = %config.model, dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let bert_config: BertConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?,
        )
        .with_context(|| format!("parsing {}", config_path.display()))?;
        if bert_config.hidden_size != config.dimension {
            return Err(Error::DimensionMismatch { expected: config.dimension, got: bert_config.hidden_size }.into());
        }

        let weights_path = model_dir.join("pytorch_model.bin");
        let weights: HashMap<String, Tensor> = candle_core::pickle::read_all(&weights_path)
            .with_context(|| format!("reading weights {}", weights_path.display()))?
            .into_iter()
            .collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = BertModel::load(vb, &bert_config)?;
        info!(dim = bert_config.hidden_size, "embedding model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            model_id: config.model.clone(),
            dim: bert_config.hidden_size,
            max_len: config.max_len,
        })
    }

    fn embed_inner(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>> {
        let start = Instant::now();
        let batch = tokenize::tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let hidden = self
            .model
            .forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(rows)
    }
}

impl EmbeddingProvider for BertEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_inner(texts)
            .map_err(|e| Error::EmbeddingUnavailable(format!("{e:#}")))
    }
}

/// Bag-of-tokens hashing embedder. Identical texts always map to identical
/// unit vectors and texts sharing words land close together, which is
/// enough for wiring tests and demos without model weights.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut v = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            v[idx] += 0.5 + ((h >> 32) as u32) as f32 / u32::MAX as f32;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingProvider for FakeEmbedder {
    fn model_id(&self) -> &str {
        "fake-xxhash"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fake_requested(config: &EmbeddingConfig) -> bool {
    config.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

/// The provider selected by configuration: the hashing embedder when
/// `embedding.use_fake` or `APP_USE_FAKE_EMBEDDINGS` is set, the BERT
/// encoder otherwise.
pub fn get_default_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    if fake_requested(config) {
        warn!(dim = config.dimension, "using fake embeddings");
        return Ok(Arc::new(FakeEmbedder::new(config.dimension)));
    }
    Ok(Arc::new(BertEmbedder::load(config)?))
}

fn resolve_model_dir(config: &EmbeddingConfig) -> anyhow::Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = &config.model_dir {
        candidates.push(chunkdb_core::config::expand_path(dir));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            candidates.push(PathBuf::from(dir));
        }
    }
    let short_name = config.model.rsplit('/').next().unwrap_or(&config.model);
    candidates.push(Path::new("models").join(short_name));
    candidates.push(Path::new("../models").join(short_name));

    candidates
        .into_iter()
        .find(|p| p.join("config.json").exists())
        .ok_or_else(|| anyhow!("Could not locate model directory for '{}'", config.model))
}
