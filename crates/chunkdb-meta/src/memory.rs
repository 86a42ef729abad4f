use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use chunkdb_core::filter::Predicate;
use chunkdb_core::traits::MetadataStore;
use chunkdb_core::types::{Chunk, ChunkId, FilterHit, StoreStats};
use chunkdb_core::{Error, Result};

/// Chunk records keyed by id. Predicates are evaluated record by record.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<BTreeMap<ChunkId, Chunk>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::StoreUnavailable("store lock poisoned".into())
}

impl MetadataStore for MemoryMetadataStore {
    fn upsert(&self, chunk: &Chunk) -> Result<()> {
        let mut stored = chunk.clone();
        stored.embedding = None;
        stored.normalize();
        self.records.write().map_err(poisoned)?.insert(stored.chunk_id.clone(), stored);
        Ok(())
    }

    fn scan(&self, predicate: &Predicate) -> Result<Vec<ChunkId>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.values().filter(|c| predicate.evaluate(c)).map(|c| c.chunk_id.clone()).collect())
    }

    fn scan_dated(&self, predicate: &Predicate) -> Result<Vec<FilterHit>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|c| predicate.evaluate(c))
            .map(|c| FilterHit { chunk_id: c.chunk_id.clone(), created_at: c.metadata.created_at })
            .collect())
    }

    fn fetch(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let records = self.records.read().map_err(poisoned)?;
        let documents: HashSet<&str> = records.values().map(|c| c.document_id.as_str()).collect();
        let users: HashSet<&str> = records.values().map(|c| c.user_id.as_str()).collect();
        Ok(StoreStats { total_chunks: records.len(), total_documents: documents.len(), total_users: users.len() })
    }
}
