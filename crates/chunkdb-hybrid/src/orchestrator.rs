//! Query path: validate a request, decide its strategy once, run the
//! retrieval legs it needs and fuse them.
//!
//! Capability calls are blocking, so each one runs on tokio's blocking pool
//! under `search.provider_timeout_ms`. Any dependency failure or timeout is
//! reported as `RetrievalUnavailable`; a query never degrades to an empty
//! result because a leg failed.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use chunkdb_core::config::{EngineConfig, SearchConfig};
use chunkdb_core::filter::{build_predicate, Predicate};
use chunkdb_core::traits::{AnnIndex, EmbeddingProvider, MetadataStore};
use chunkdb_core::types::{Chunk, ChunkId, Embedding, SearchRequest, SearchResponse, SearchResult, VectorHit};
use chunkdb_core::{Error, Result};

use crate::combiner::{combine, FilterHit, Ranked, Signals, Weight};
use crate::stats::{IndexStats, StatsContext};

/// Strategy chosen from which request fields are present.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    Semantic { query: String },
    Metadata { predicate: Predicate },
    Hybrid { query: String, predicate: Predicate, weight: Weight },
}

impl QueryPlan {
    pub fn strategy(&self) -> &'static str {
        match self {
            QueryPlan::Semantic { .. } => "semantic",
            QueryPlan::Metadata { .. } => "metadata",
            QueryPlan::Hybrid { .. } => "hybrid",
        }
    }
}

/// A validated request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub plan: QueryPlan,
    pub top_k: usize,
}

impl PlannedQuery {
    /// Check preconditions and pick the strategy. `weight_vector` is
    /// validated even when the plan ends up not using it.
    pub fn from_request(request: &SearchRequest, config: &SearchConfig) -> Result<Self> {
        if request.top_k == 0 {
            return Err(Error::InvalidRequest("top_k must be at least 1".into()));
        }
        if request.top_k > config.max_top_k {
            return Err(Error::InvalidRequest(format!(
                "top_k {} exceeds the maximum of {}",
                request.top_k, config.max_top_k
            )));
        }
        let weight = Weight::new(request.weight_vector)?;
        let query = match request.query.as_deref().map(str::trim) {
            Some("") => return Err(Error::InvalidRequest("query must not be empty".into())),
            other => other.map(str::to_string),
        };
        let predicate = request.filters.as_ref().map(build_predicate).transpose()?;

        let plan = match (query, predicate) {
            (Some(query), None) => QueryPlan::Semantic { query },
            (None, Some(predicate)) => QueryPlan::Metadata { predicate },
            (Some(query), Some(predicate)) => QueryPlan::Hybrid { query, predicate, weight },
            (None, None) => {
                return Err(Error::InvalidRequest("either query or filters must be provided".into()));
            }
        };
        Ok(Self { plan, top_k: request.top_k })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Embed,
    AnnQuery,
    MetadataScan,
    Hydrate,
    Stats,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Embed => "embed",
            Stage::AnnQuery => "ann_query",
            Stage::MetadataScan => "metadata_scan",
            Stage::Hydrate => "hydrate",
            Stage::Stats => "stats",
        }
    }

    /// The dependency error a timeout or crashed worker stands for.
    fn unavailable(self, reason: String) -> Error {
        match self {
            Stage::Embed => Error::EmbeddingUnavailable(reason),
            Stage::AnnQuery => Error::IndexUnavailable(reason),
            Stage::MetadataScan | Stage::Hydrate | Stage::Stats => Error::StoreUnavailable(reason),
        }
    }
}

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn AnnIndex>,
    store: Arc<dyn MetadataStore>,
    config: SearchConfig,
    stats: StatsContext,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn AnnIndex>,
        store: Arc<dyn MetadataStore>,
        config: &EngineConfig,
    ) -> Self {
        Self { embedder, index, store, config: config.search.clone(), stats: StatsContext::from_config(config) }
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.config
    }

    /// Serve one request end to end.
    #[instrument(skip_all, fields(top_k = request.top_k))]
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let planned = PlannedQuery::from_request(request, &self.config)?;
        info!(strategy = planned.plan.strategy(), "executing search");
        let results = self.execute(&planned).await?;
        let response = SearchResponse::new(results, start.elapsed());
        info!(
            strategy = planned.plan.strategy(),
            results = response.total_results,
            query_time_ms = response.query_time_ms,
            "search complete"
        );
        Ok(response)
    }

    /// Run an already validated plan.
    pub async fn execute(&self, planned: &PlannedQuery) -> Result<Vec<SearchResult>> {
        let top_k = planned.top_k;
        // Rankings keep every candidate so hydration can backfill past ids
        // that have a vector but no record.
        let oversampled = top_k.saturating_mul(self.config.oversample_factor);
        let ranked = match &planned.plan {
            QueryPlan::Semantic { query } => {
                let hits = self.semantic_leg(query, oversampled).await?;
                combine(Signals::Semantic(&hits), usize::MAX)
            }
            QueryPlan::Metadata { predicate } => {
                let hits = self.scan_dated(predicate.clone()).await?;
                combine(Signals::Metadata(&hits), usize::MAX)
            }
            QueryPlan::Hybrid { query, predicate, weight } => {
                let (hits, ids) =
                    tokio::try_join!(self.semantic_leg(query, oversampled), self.scan(predicate.clone()))?;
                let filter: BTreeSet<ChunkId> = ids.into_iter().collect();
                debug!(vector_hits = hits.len(), filter_hits = filter.len(), weight = weight.value(), "fusing legs");
                combine(Signals::Hybrid { vector: &hits, filter: &filter, weight: *weight }, usize::MAX)
            }
        };
        self.hydrate(&ranked, top_k).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let ctx = self.stats.clone();
        self.blocking(Stage::Stats, move || ctx.collect(store.as_ref(), embedder.as_ref())).await
    }

    async fn blocking<T, F>(&self, stage: Stage, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let limit = self.config.provider_timeout();
        let started = Instant::now();
        let outcome = match tokio::time::timeout(limit, tokio::task::spawn_blocking(op)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(stage.unavailable(format!("worker failed: {join}"))),
            Err(_) => Err(stage.unavailable(format!("timed out after {} ms", limit.as_millis()))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(stage = stage.name(), elapsed_ms, ok = outcome.is_ok(), "stage finished");
        outcome.map_err(|e| {
            warn!(stage = stage.name(), error = %e, "retrieval stage failed");
            Error::retrieval(stage.name(), e)
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Embedding> {
        let embedder = Arc::clone(&self.embedder);
        let texts = vec![query.to_string()];
        self.blocking(Stage::Embed, move || {
            let mut vectors = embedder.embed_batch(&texts)?;
            match (vectors.pop(), vectors.is_empty()) {
                (Some(v), true) => Ok(v),
                _ => Err(Error::EmbeddingUnavailable("expected exactly one query vector".into())),
            }
        })
        .await
    }

    async fn semantic_leg(&self, query: &str, k: usize) -> Result<Vec<VectorHit>> {
        let vector = self.embed_query(query).await?;
        let index = Arc::clone(&self.index);
        self.blocking(Stage::AnnQuery, move || index.query(&vector, k)).await
    }

    async fn scan(&self, predicate: Predicate) -> Result<Vec<ChunkId>> {
        let store = Arc::clone(&self.store);
        self.blocking(Stage::MetadataScan, move || store.scan(&predicate)).await
    }

    async fn scan_dated(&self, predicate: Predicate) -> Result<Vec<FilterHit>> {
        let store = Arc::clone(&self.store);
        self.blocking(Stage::MetadataScan, move || store.scan_dated(&predicate)).await
    }

    async fn fetch(&self, ids: Vec<ChunkId>) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let store = Arc::clone(&self.store);
        self.blocking(Stage::Hydrate, move || store.fetch(&ids)).await
    }

    /// Load records for the best `top_k` ranked ids. Ids missing from the
    /// store are skipped and the next candidates fill their places.
    async fn hydrate(&self, ranked: &[Ranked], top_k: usize) -> Result<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(top_k.min(ranked.len()));
        let mut rest = ranked;
        while results.len() < top_k && !rest.is_empty() {
            let (window, tail) = rest.split_at((top_k - results.len()).min(rest.len()));
            rest = tail;
            let records = self.fetch(window.iter().map(|r| r.chunk_id.clone()).collect()).await?;
            results.extend(assemble(window, records));
        }
        Ok(results)
    }
}

/// Attach records to ranked ids, keeping rank order. Ids with no record
/// (vector written but metadata write lost) are skipped.
fn assemble(ranked: &[Ranked], records: Vec<Chunk>) -> Vec<SearchResult> {
    let mut by_id: HashMap<ChunkId, Chunk> = records.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();
    ranked
        .iter()
        .filter_map(|r| match by_id.remove(&r.chunk_id) {
            Some(chunk) => Some(SearchResult::from_chunk(chunk, r.score)),
            None => {
                warn!(chunk_id = %r.chunk_id, "ranked chunk missing from metadata store");
                None
            }
        })
        .collect()
}
