//! LanceDB-backed ANN index.
//!
//! The index owns a private tokio runtime and drives the async LanceDB client
//! with `block_on`, so callers see the blocking [`AnnIndex`] interface. Async
//! callers must invoke it from a blocking worker.
use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use chunkdb_core::traits::AnnIndex;
use chunkdb_core::types::{ChunkId, Embedding, VectorHit};
use chunkdb_core::{Error, Result};

use crate::schema::{build_arrow_schema, DISTANCE_COLUMN, ID_COLUMN};
use crate::sort_hits;

fn unavailable(e: impl std::fmt::Display) -> Error {
    Error::IndexUnavailable(e.to_string())
}

pub struct LanceAnnIndex {
    rt: Option<Runtime>,
    db: Connection,
    table_name: String,
    dim: usize,
    /// Serialises create-or-merge so two writers never race on table creation.
    write_lock: Mutex<()>,
}

impl LanceAnnIndex {
    /// Connect to (or create) the database at `db_path`. The table itself is
    /// created lazily on first upsert.
    pub fn open(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(unavailable)?;
        let uri = db_path.to_string_lossy().to_string();
        let db = rt.block_on(async { connect(&uri).execute().await }).map_err(unavailable)?;
        info!(uri = %uri, table = table_name, dim, "opened LanceDB vector index");
        Ok(Self { rt: Some(rt), db, table_name: table_name.to_string(), dim, write_lock: Mutex::new(()) })
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.rt.as_ref().ok_or_else(|| Error::IndexUnavailable("index runtime shut down".into()))
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, got: vector.len() });
        }
        Ok(())
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self.db.table_names().execute().await.map_err(unavailable)?;
        Ok(names.contains(&self.table_name))
    }

    fn to_record_batch(&self, items: &[(ChunkId, Embedding)]) -> Result<RecordBatch> {
        let ids: Vec<&str> = items.iter().map(|(id, _)| id.as_str()).collect();
        let vectors = items.iter().map(|(_, v)| Some(v.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
        RecordBatch::try_new(
            build_arrow_schema(self.dim),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors,
                    self.dim as i32,
                )),
            ],
        )
        .map_err(unavailable)
    }

    async fn write_batch(&self, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        if self.table_exists().await? {
            let table = self.db.open_table(&self.table_name).execute().await.map_err(unavailable)?;
            let mut merge = table.merge_insert(&[ID_COLUMN]);
            merge.when_matched_update_all(None).when_not_matched_insert_all();
            merge.execute(reader).await.map_err(unavailable)?;
        } else {
            self.db.create_table(&self.table_name, reader).execute().await.map_err(unavailable)?;
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if !self.table_exists().await? {
            return Ok(Vec::new());
        }
        let table = self.db.open_table(&self.table_name).execute().await.map_err(unavailable)?;
        let mut stream = table
            .vector_search(vector.to_vec())
            .map_err(unavailable)?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(unavailable)?;

        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(unavailable)? {
            let ids = batch
                .column_by_name(ID_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::IndexUnavailable("search result missing id column".into()))?;
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| Error::IndexUnavailable("search result missing distance column".into()))?;
            for i in 0..batch.num_rows() {
                // cosine distance is 1 - similarity
                let similarity = (1.0 - distances.value(i)).clamp(-1.0, 1.0);
                hits.push(VectorHit { chunk_id: ids.value(i).to_string(), similarity });
            }
        }
        Ok(hits)
    }
}

impl AnnIndex for LanceAnnIndex {
    fn upsert(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.upsert_batch(&[(id.to_string(), vector.to_vec())])
    }

    fn upsert_batch(&self, items: &[(ChunkId, Embedding)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        for (_, v) in items {
            self.check_dim(v)?;
        }
        let batch = self.to_record_batch(items)?;
        let _guard = self.write_lock.lock().map_err(|_| Error::IndexUnavailable("write lock poisoned".into()))?;
        self.runtime()?.block_on(self.write_batch(batch))?;
        debug!(table = %self.table_name, rows = items.len(), "upserted vectors");
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.check_dim(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut hits = self.runtime()?.block_on(self.search(vector, k))?;
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> Result<usize> {
        self.runtime()?.block_on(async {
            if !self.table_exists().await? {
                return Ok(0);
            }
            let table = self.db.open_table(&self.table_name).execute().await.map_err(unavailable)?;
            table.count_rows(None).await.map_err(unavailable)
        })
    }
}

impl Drop for LanceAnnIndex {
    fn drop(&mut self) {
        // Dropping a runtime blocks; that panics when the last handle goes
        // away inside an async context.
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}
