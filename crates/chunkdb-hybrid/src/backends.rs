//! Wiring for the on-disk stack: candle embeddings, LanceDB vectors and a
//! tantivy metadata store, laid out under the configured storage paths.
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use chunkdb_core::config::{resolve_with_base, EngineConfig};
use chunkdb_core::traits::{AnnIndex, EmbeddingProvider, MetadataStore};
use chunkdb_core::Result;
use chunkdb_embed::get_default_embedder;
use chunkdb_meta::TantivyMetadataStore;
use chunkdb_vector::LanceAnnIndex;

use crate::indexer::Indexer;
use crate::orchestrator::RetrievalEngine;

/// The three collaborators shared by the indexer and the query engine.
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn AnnIndex>,
    pub store: Arc<dyn MetadataStore>,
}

impl Backends {
    /// Open the local stack. Relative storage paths resolve against `base`.
    pub fn open_local(config: &EngineConfig, base: &Path) -> anyhow::Result<Self> {
        let embedder = get_default_embedder(&config.embedding)?;
        let lancedb_dir = resolve_with_base(base, &config.storage.lancedb_dir);
        let tantivy_dir = resolve_with_base(base, &config.storage.tantivy_dir);
        let index = LanceAnnIndex::open(&lancedb_dir, &config.storage.table_name, embedder.dim())
            .with_context(|| format!("opening vector index at {}", lancedb_dir.display()))?;
        let store = TantivyMetadataStore::open(&tantivy_dir)
            .with_context(|| format!("opening metadata store at {}", tantivy_dir.display()))?;
        info!(
            lancedb = %lancedb_dir.display(),
            tantivy = %tantivy_dir.display(),
            model = embedder.model_id(),
            "local backends opened"
        );
        Ok(Self { embedder, index: Arc::new(index), store: Arc::new(store) })
    }

    pub fn indexer(&self, config: &EngineConfig) -> Result<Indexer> {
        Indexer::new(Arc::clone(&self.embedder), Arc::clone(&self.index), Arc::clone(&self.store), config)
    }

    pub fn engine(&self, config: &EngineConfig) -> RetrievalEngine {
        RetrievalEngine::new(Arc::clone(&self.embedder), Arc::clone(&self.index), Arc::clone(&self.store), config)
    }
}
