use serde::Serialize;

use chunkdb_core::config::EngineConfig;
use chunkdb_core::traits::{EmbeddingProvider, MetadataStore};
use chunkdb_core::Result;

/// Snapshot of what is indexed and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_documents: usize,
    pub total_users: usize,
    pub collection_name: String,
    pub embedding_dimension: usize,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_threshold: f32,
}

/// The configuration half of [`IndexStats`], captured at construction.
#[derive(Debug, Clone)]
pub(crate) struct StatsContext {
    collection_name: String,
    chunk_size: usize,
    chunk_overlap: usize,
    similarity_threshold: f32,
}

impl StatsContext {
    pub(crate) fn from_config(config: &EngineConfig) -> Self {
        Self {
            collection_name: config.storage.table_name.clone(),
            chunk_size: config.chunking.target_chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            similarity_threshold: config.chunking.similarity_threshold,
        }
    }

    pub(crate) fn collect(&self, store: &dyn MetadataStore, embedder: &dyn EmbeddingProvider) -> Result<IndexStats> {
        let counts = store.stats()?;
        Ok(IndexStats {
            total_chunks: counts.total_chunks,
            total_documents: counts.total_documents,
            total_users: counts.total_users,
            collection_name: self.collection_name.clone(),
            embedding_dimension: embedder.dim(),
            embedding_model: embedder.model_id().to_string(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            similarity_threshold: self.similarity_threshold,
        })
    }
}
