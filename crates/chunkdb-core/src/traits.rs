//! Capability interfaces for the engine's external collaborators.
//!
//! All methods are blocking; async callers run them on a blocking worker and
//! enforce their own timeout.
use crate::error::Result;
use crate::filter::Predicate;
use crate::types::{Chunk, ChunkId, Embedding, FilterHit, StoreStats, VectorHit};

/// Maps text to fixed-length vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the model behind this provider.
    fn model_id(&self) -> &str;
    /// Embedding dimensionality.
    fn dim(&self) -> usize;
    /// Embed `texts`, returning exactly one vector per input in input order.
    /// Fails with `EmbeddingUnavailable`.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Approximate nearest-neighbour index over `(id, vector)` pairs using
/// cosine similarity. Fails with `IndexUnavailable`.
pub trait AnnIndex: Send + Sync {
    fn upsert(&self, id: &str, vector: &[f32]) -> Result<()>;

    fn upsert_batch(&self, items: &[(ChunkId, Embedding)]) -> Result<()> {
        for (id, vector) in items {
            self.upsert(id, vector)?;
        }
        Ok(())
    }

    /// At most `k` hits, best first.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    fn len(&self) -> Result<usize>;
}

/// Structured store of chunk records. Fails with `StoreUnavailable`.
pub trait MetadataStore: Send + Sync {
    fn upsert(&self, chunk: &Chunk) -> Result<()>;

    fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.upsert(chunk)?;
        }
        Ok(())
    }

    /// Ids of every stored chunk satisfying `predicate`, ascending, without
    /// duplicates.
    fn scan(&self, predicate: &Predicate) -> Result<Vec<ChunkId>>;

    /// Like [`MetadataStore::scan`], but each id carries its `created_at` so
    /// callers can rank by recency and load only the records they return.
    fn scan_dated(&self, predicate: &Predicate) -> Result<Vec<FilterHit>> {
        let ids = self.scan(predicate)?;
        Ok(self
            .fetch(&ids)?
            .into_iter()
            .map(|c| FilterHit { chunk_id: c.chunk_id, created_at: c.metadata.created_at })
            .collect())
    }

    /// Records for `ids`, in the order requested. Unknown ids are omitted.
    fn fetch(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>>;

    fn stats(&self) -> Result<StoreStats>;
}
