use std::collections::HashMap;
use std::sync::RwLock;

use chunkdb_core::math::cosine_similarity;
use chunkdb_core::traits::AnnIndex;
use chunkdb_core::types::{ChunkId, Embedding, VectorHit};
use chunkdb_core::{Error, Result};

use crate::sort_hits;

/// Brute-force cosine index held in memory. Exact, so it doubles as the
/// reference the LanceDB index is checked against.
pub struct MemoryAnnIndex {
    dim: usize,
    vectors: RwLock<HashMap<ChunkId, Embedding>>,
}

impl MemoryAnnIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, vectors: RwLock::new(HashMap::new()) }
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, got: vector.len() });
        }
        Ok(())
    }
}

impl AnnIndex for MemoryAnnIndex {
    fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dim(vector)?;
        let mut map = self.vectors.write().map_err(|_| Error::IndexUnavailable("index lock poisoned".into()))?;
        map.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.check_dim(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let map = self.vectors.read().map_err(|_| Error::IndexUnavailable("index lock poisoned".into()))?;
        let mut hits: Vec<VectorHit> = map
            .iter()
            .map(|(id, v)| VectorHit { chunk_id: id.clone(), similarity: cosine_similarity(vector, v) })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> Result<usize> {
        let map = self.vectors.read().map_err(|_| Error::IndexUnavailable("index lock poisoned".into()))?;
        Ok(map.len())
    }
}
