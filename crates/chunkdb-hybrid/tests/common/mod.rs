#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chunkdb_core::config::EngineConfig;
use chunkdb_core::filter::Predicate;
use chunkdb_core::traits::{AnnIndex, EmbeddingProvider, MetadataStore};
use chunkdb_core::types::{Chunk, ChunkId, ChunkMetadata, Embedding, Source, StoreStats, VectorHit};
use chunkdb_core::{Error, Result};
use chunkdb_hybrid::{Indexer, RetrievalEngine};
use chunkdb_meta::MemoryMetadataStore;
use chunkdb_vector::MemoryAnnIndex;

/// Unit vector in the plane whose cosine with `[1, 0]` is `similarity`.
pub fn at_similarity(similarity: f32) -> Embedding {
    let angle = similarity.acos();
    vec![angle.cos(), angle.sin()]
}

/// Looks texts up in a table; anything unknown embeds to `[1, 0]`.
#[derive(Default)]
pub struct ScriptedEmbedder {
    vectors: HashMap<String, Embedding>,
    delay: Option<Duration>,
}

impl ScriptedEmbedder {
    pub fn with(mut self, text: &str, vector: Embedding) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl EmbeddingProvider for ScriptedEmbedder {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn dim(&self) -> usize {
        2
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(texts.iter().map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| vec![1.0, 0.0])).collect())
    }
}

pub struct DownEmbedder;

impl EmbeddingProvider for DownEmbedder {
    fn model_id(&self) -> &str {
        "down"
    }

    fn dim(&self) -> usize {
        2
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(Error::EmbeddingUnavailable("connection refused".into()))
    }
}

pub struct DownIndex;

impl AnnIndex for DownIndex {
    fn upsert(&self, _id: &str, _vector: &[f32]) -> Result<()> {
        Err(Error::IndexUnavailable("disk full".into()))
    }

    fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<VectorHit>> {
        Err(Error::IndexUnavailable("index offline".into()))
    }

    fn len(&self) -> Result<usize> {
        Err(Error::IndexUnavailable("index offline".into()))
    }
}

pub struct DownStore;

impl MetadataStore for DownStore {
    fn upsert(&self, _chunk: &Chunk) -> Result<()> {
        Err(Error::StoreUnavailable("store offline".into()))
    }

    fn scan(&self, _predicate: &Predicate) -> Result<Vec<ChunkId>> {
        Err(Error::StoreUnavailable("store offline".into()))
    }

    fn fetch(&self, _ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        Err(Error::StoreUnavailable("store offline".into()))
    }

    fn stats(&self) -> Result<StoreStats> {
        Err(Error::StoreUnavailable("store offline".into()))
    }
}

pub fn chunk(id: &str, content: &str, tags: &[&str]) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        document_id: format!("doc_{id}"),
        user_id: "u1".into(),
        content: content.to_string(),
        embedding: None,
        metadata: ChunkMetadata {
            source: Source::Pdf,
            page_number: 1,
            chunk_index: 0,
            created_at: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        },
    }
}

pub struct Harness {
    pub index: Arc<MemoryAnnIndex>,
    pub store: Arc<MemoryMetadataStore>,
    pub indexer: Indexer,
    pub engine: RetrievalEngine,
}

pub fn harness(embedder: ScriptedEmbedder, config: &EngineConfig) -> Harness {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(embedder);
    let index = Arc::new(MemoryAnnIndex::new(2));
    let store = Arc::new(MemoryMetadataStore::new());
    let indexer = Indexer::new(embedder.clone(), index.clone(), store.clone(), config).expect("indexer");
    let engine = RetrievalEngine::new(embedder, index.clone(), store.clone(), config);
    Harness { index, store, indexer, engine }
}
