//! Ingestion path: chunk page text, embed chunk contents and write each
//! chunk to the ANN index and the metadata store.
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use chunkdb_core::chunker::{chunker_for, Chunker};
use chunkdb_core::config::EngineConfig;
use chunkdb_core::traits::{AnnIndex, EmbeddingProvider, MetadataStore};
use chunkdb_core::types::{Chunk, ChunkId, Embedding, PageContext, Source};
use chunkdb_core::{Error, Result};

use crate::stats::{IndexStats, StatsContext};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    pub chunk_ids: Vec<ChunkId>,
    pub total_chunks: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn AnnIndex>,
    store: Arc<dyn MetadataStore>,
    chunker: Box<dyn Chunker>,
    embed_batch_size: usize,
    stats: StatsContext,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn AnnIndex>,
        store: Arc<dyn MetadataStore>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let chunker = chunker_for(&config.chunking, Arc::clone(&embedder))?;
        info!(chunker = chunker.name(), model = embedder.model_id(), dim = embedder.dim(), "indexer ready");
        Ok(Self {
            embedder,
            index,
            store,
            chunker,
            embed_batch_size: config.chunking.embed_batch_size.max(1),
            stats: StatsContext::from_config(config),
        })
    }

    /// Chunk one page without indexing it.
    pub fn chunk_page(&self, text: &str, page: &PageContext) -> Result<Vec<Chunk>> {
        self.chunker.chunk(text, page)
    }

    /// Chunk and index one page of text.
    #[instrument(skip_all, fields(document_id = %page.document_id, page = page.page_number))]
    pub fn ingest(&self, text: &str, page: &PageContext) -> Result<IndexReport> {
        let start = Instant::now();
        let chunks = self.chunk_page(text, page)?;
        let chunk_ids = if chunks.is_empty() { Vec::new() } else { self.index_chunks(chunks)? };
        Ok(report(&page.document_id, chunk_ids, start))
    }

    /// Chunk every page of a document (page numbers start at 1), then index
    /// all chunks together. Nothing is written if any page fails to chunk.
    #[instrument(skip_all, fields(document_id = document_id, pages = pages.len()))]
    pub fn index_document<S: AsRef<str>>(
        &self,
        document_id: &str,
        user_id: &str,
        source: Source,
        tags: &BTreeSet<String>,
        pages: &[S],
    ) -> Result<IndexReport> {
        let start = Instant::now();
        let mut chunks = Vec::new();
        for (page_number, text) in (1u32..).zip(pages) {
            let mut page = PageContext::new(document_id, user_id, page_number, source);
            page.tags = tags.clone();
            chunks.extend(self.chunk_page(text.as_ref(), &page)?);
        }
        let chunk_ids = if chunks.is_empty() { Vec::new() } else { self.index_chunks(chunks)? };
        let report = report(document_id, chunk_ids, start);
        info!(total_chunks = report.total_chunks, elapsed_ms = report.elapsed.as_millis() as u64, "document indexed");
        Ok(report)
    }

    /// Index externally produced chunks. Vectors go to the ANN index first so
    /// a record visible in the store always has a vector behind it.
    pub fn index_chunks(&self, mut chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        if chunks.is_empty() {
            return Err(Error::InvalidRequest("no chunks to index".into()));
        }
        for chunk in chunks.iter_mut() {
            chunk.normalize();
        }
        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            chunk.validate()?;
            if !seen.insert(chunk.chunk_id.as_str()) {
                return Err(Error::InvalidRequest(format!("duplicate chunk_id '{}' in batch", chunk.chunk_id)));
            }
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embed_contents(&contents)?;

        let now = Utc::now();
        for (chunk, embedding) in chunks.iter_mut().zip(&embeddings) {
            chunk.metadata.created_at.get_or_insert(now);
            chunk.embedding = Some(embedding.clone());
        }
        let vectors: Vec<(ChunkId, Embedding)> =
            chunks.iter().map(|c| c.chunk_id.clone()).zip(embeddings).collect();
        self.index.upsert_batch(&vectors)?;
        self.store.upsert_batch(&chunks)?;
        debug!(chunks = chunks.len(), "chunks written to index and store");
        Ok(chunks.into_iter().map(|c| c.chunk_id).collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.stats.collect(self.store.as_ref(), self.embedder.as_ref())
    }

    fn embed_contents(&self, contents: &[String]) -> Result<Vec<Embedding>> {
        let dim = self.embedder.dim();
        let mut out = Vec::with_capacity(contents.len());
        for batch in contents.chunks(self.embed_batch_size) {
            let vectors = self.embedder.embed_batch(batch)?;
            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(Error::DimensionMismatch { expected: dim, got: bad.len() });
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn report(document_id: &str, chunk_ids: Vec<ChunkId>, start: Instant) -> IndexReport {
    IndexReport {
        document_id: document_id.to_string(),
        total_chunks: chunk_ids.len(),
        chunk_ids,
        elapsed: start.elapsed(),
    }
}
