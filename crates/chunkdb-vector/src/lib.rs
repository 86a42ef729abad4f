//! Approximate nearest-neighbour indexes over chunk embeddings.
//!
//! [`LanceAnnIndex`] persists vectors in a LanceDB table and searches with
//! cosine distance. [`MemoryAnnIndex`] is a brute-force index for tests and
//! small corpora.

pub mod lance;
pub mod memory;
pub mod schema;

pub use lance::LanceAnnIndex;
pub use memory::MemoryAnnIndex;

use chunkdb_core::types::VectorHit;

/// Best first; equal similarities fall back to ascending id so results are
/// reproducible.
pub(crate) fn sort_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
}
