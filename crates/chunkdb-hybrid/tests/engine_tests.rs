mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};

use chunkdb_core::config::EngineConfig;
use chunkdb_core::filter::{FilterSpec, Predicate};
use chunkdb_core::traits::{AnnIndex, MetadataStore};
use chunkdb_core::types::{Chunk, ChunkId, FilterHit, SearchRequest, StoreStats};
use chunkdb_core::Error;
use chunkdb_hybrid::RetrievalEngine;
use chunkdb_meta::MemoryMetadataStore;
use chunkdb_vector::MemoryAnnIndex;

use common::{at_similarity, chunk, harness, DownEmbedder, DownIndex, DownStore, ScriptedEmbedder};

fn ids(response: &chunkdb_core::types::SearchResponse) -> Vec<&str> {
    response.results.iter().map(|r| r.chunk_id.as_str()).collect()
}

#[tokio::test]
async fn semantic_returns_top_k_by_similarity() {
    let embedder = ScriptedEmbedder::default()
        .with("amount", vec![1.0, 0.0])
        .with("total is ten dollars", at_similarity(0.9))
        .with("payment terms", at_similarity(0.5))
        .with("weather report", at_similarity(0.2));
    let h = harness(embedder, &EngineConfig::default());
    h.indexer
        .index_chunks(vec![
            chunk("c1", "total is ten dollars", &[]),
            chunk("c2", "payment terms", &[]),
            chunk("c3", "weather report", &[]),
        ])
        .unwrap();

    let response = h.engine.search(&SearchRequest::semantic("amount", 2)).await.unwrap();
    assert_eq!(ids(&response), vec!["c1", "c2"]);
    assert_eq!(response.total_results, 2);
    assert!((response.results[0].score - 0.9).abs() < 1e-4);
    assert!((response.results[1].score - 0.5).abs() < 1e-4);
    assert!(response.results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    assert!(response.query_time_ms >= 0.0);
}

#[tokio::test]
async fn negative_similarity_is_clamped_to_zero() {
    let embedder = ScriptedEmbedder::default().with("q", vec![1.0, 0.0]).with("opposite", vec![-1.0, 0.0]);
    let h = harness(embedder, &EngineConfig::default());
    h.indexer.index_chunks(vec![chunk("c1", "opposite", &[])]).unwrap();
    let response = h.engine.search(&SearchRequest::semantic("q", 5)).await.unwrap();
    assert_eq!(response.results[0].score, 0.0);
}

#[tokio::test]
async fn metadata_only_returns_every_tagged_chunk_at_full_score() {
    let h = harness(ScriptedEmbedder::default(), &EngineConfig::default());
    h.indexer
        .index_chunks(vec![
            chunk("a", "alpha", &["invoice"]),
            chunk("b", "bravo", &["receipt"]),
            chunk("c", "charlie", &["invoice", "2024"]),
            chunk("d", "delta", &[]),
            chunk("e", "echo", &["invoice"]),
        ])
        .unwrap();

    let request = SearchRequest::metadata(FilterSpec::default().with_tags(["invoice"]), 10);
    let response = h.engine.search(&request).await.unwrap();
    // one indexing batch shares a timestamp, so ids break the tie
    assert_eq!(ids(&response), vec!["a", "c", "e"]);
    assert!(response.results.iter().all(|r| r.score == 1.0));
}

#[tokio::test]
async fn metadata_only_prefers_newest_chunks() {
    let h = harness(ScriptedEmbedder::default(), &EngineConfig::default());
    let mut old = chunk("zz_old", "old", &["t"]);
    old.metadata.created_at = Some(chrono::Utc::now() - chrono::Duration::days(30));
    h.indexer.index_chunks(vec![old]).unwrap();
    h.indexer.index_chunks(vec![chunk("aa_new", "new", &["t"])]).unwrap();

    let response = h.engine.search(&SearchRequest::metadata(FilterSpec::default(), 1)).await.unwrap();
    assert_eq!(ids(&response), vec!["aa_new"]);
}

#[tokio::test]
async fn empty_filter_browses_everything() {
    let h = harness(ScriptedEmbedder::default(), &EngineConfig::default());
    h.indexer.index_chunks(vec![chunk("a", "x", &[]), chunk("b", "y", &["t"])]).unwrap();
    let request = SearchRequest::from_json(r#"{"filters": {}, "top_k": 10}"#).unwrap();
    let response = h.engine.search(&request).await.unwrap();
    assert_eq!(response.total_results, 2);
}

#[tokio::test]
async fn hybrid_fuses_semantic_and_filter_scores() {
    let embedder = ScriptedEmbedder::default()
        .with("late fee", vec![1.0, 0.0])
        .with("chunk A text", at_similarity(0.8))
        .with("chunk B text", at_similarity(0.3));
    let h = harness(embedder, &EngineConfig::default());
    h.indexer
        .index_chunks(vec![chunk("A", "chunk A text", &[]), chunk("B", "chunk B text", &["invoice"])])
        .unwrap();

    let request = SearchRequest::hybrid("late fee", FilterSpec::default().with_tags(["invoice"]), 5, 0.7);
    let response = h.engine.search(&request).await.unwrap();
    assert_eq!(ids(&response), vec!["A", "B"]);
    assert!((response.results[0].score - 0.56).abs() < 1e-4);
    assert!((response.results[1].score - 0.51).abs() < 1e-4);
}

#[tokio::test]
async fn hybrid_oversamples_the_vector_leg() {
    // A plain top-1 ANN query would only return "best", leaving "tagged"
    // with the filter term alone (0.5) instead of 0.7 * 0.5 + 0.5.
    let embedder = ScriptedEmbedder::default()
        .with("q", vec![1.0, 0.0])
        .with("best", at_similarity(0.9))
        .with("tagged", at_similarity(0.7));
    let h = harness(embedder, &EngineConfig::default());
    h.indexer.index_chunks(vec![chunk("best", "best", &[]), chunk("tagged", "tagged", &["keep"])]).unwrap();

    let request = SearchRequest::hybrid("q", FilterSpec::default().with_tags(["keep"]), 1, 0.5);
    let response = h.engine.search(&request).await.unwrap();
    assert_eq!(ids(&response), vec!["tagged"]);
    assert!((response.results[0].score - 0.85).abs() < 1e-4);
}

#[tokio::test]
async fn results_are_deterministic_across_runs() {
    let h = harness(ScriptedEmbedder::default(), &EngineConfig::default());
    h.indexer
        .index_chunks(vec![chunk("c", "same", &[]), chunk("a", "same too", &[]), chunk("b", "also same", &[])])
        .unwrap();
    let request = SearchRequest::semantic("anything", 3);
    let first = h.engine.search(&request).await.unwrap();
    for _ in 0..5 {
        assert_eq!(ids(&h.engine.search(&request).await.unwrap()), ids(&first));
    }
    assert_eq!(ids(&first), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_work() {
    let engine = RetrievalEngine::new(
        Arc::new(DownEmbedder),
        Arc::new(DownIndex),
        Arc::new(DownStore),
        &EngineConfig::default(),
    );
    let err = engine.search(&SearchRequest::semantic("q", 0)).await.unwrap_err();
    assert!(err.is_invalid_request(), "{err}");
    let err = engine.search(&SearchRequest::hybrid("q", FilterSpec::default(), 3, 2.0)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidWeight(_)));
    let err = SearchRequest::from_json(r#"{"query": "q", "filters": {"colour": "red"}}"#).unwrap_err();
    assert!(matches!(err, Error::InvalidFilterField(f) if f == "colour"));
}

#[tokio::test]
async fn embedding_failure_surfaces_as_retrieval_unavailable() {
    let engine = RetrievalEngine::new(
        Arc::new(DownEmbedder),
        Arc::new(MemoryAnnIndex::new(2)),
        Arc::new(MemoryMetadataStore::new()),
        &EngineConfig::default(),
    );
    let err = engine.search(&SearchRequest::semantic("q", 3)).await.unwrap_err();
    match err {
        Error::RetrievalUnavailable { stage, source } => {
            assert_eq!(stage, "embed");
            assert!(matches!(*source, Error::EmbeddingUnavailable(_)));
        }
        other => panic!("expected RetrievalUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn hybrid_does_not_fall_back_to_filter_leg_when_index_is_down() {
    let store = Arc::new(MemoryMetadataStore::new());
    store.upsert(&chunk("a", "alpha", &["invoice"])).unwrap();
    let engine = RetrievalEngine::new(
        Arc::new(ScriptedEmbedder::default()),
        Arc::new(DownIndex),
        store,
        &EngineConfig::default(),
    );
    let request = SearchRequest::hybrid("q", FilterSpec::default().with_tags(["invoice"]), 3, 0.7);
    let err = engine.search(&request).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable { stage: "ann_query", .. }), "{err:?}");
}

#[tokio::test]
async fn store_failure_surfaces_as_retrieval_unavailable() {
    let index = Arc::new(MemoryAnnIndex::new(2));
    index.upsert("a", &[1.0, 0.0]).unwrap();
    let engine = RetrievalEngine::new(
        Arc::new(ScriptedEmbedder::default()),
        index,
        Arc::new(DownStore),
        &EngineConfig::default(),
    );
    let err = engine.search(&SearchRequest::semantic("q", 3)).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable { stage: "hydrate", .. }), "{err:?}");
    let err = engine.search(&SearchRequest::metadata(FilterSpec::default(), 3)).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable { stage: "metadata_scan", .. }), "{err:?}");
}

#[tokio::test]
async fn slow_provider_times_out() {
    let mut config = EngineConfig::default();
    config.search.provider_timeout_ms = 50;
    let engine = RetrievalEngine::new(
        Arc::new(ScriptedEmbedder::default().slow(Duration::from_millis(400))),
        Arc::new(MemoryAnnIndex::new(2)),
        Arc::new(MemoryMetadataStore::new()),
        &config,
    );
    let err = engine.search(&SearchRequest::semantic("q", 3)).await.unwrap_err();
    match err {
        Error::RetrievalUnavailable { stage: "embed", source } => {
            assert!(source.to_string().contains("timed out"), "{source}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn vectors_without_records_are_skipped() {
    let index = Arc::new(MemoryAnnIndex::new(2));
    let store = Arc::new(MemoryMetadataStore::new());
    index.upsert("orphan", &[1.0, 0.0]).unwrap();
    index.upsert("kept", &[0.8, 0.6]).unwrap();
    store.upsert(&chunk("kept", "kept", &[])).unwrap();
    let engine = RetrievalEngine::new(Arc::new(ScriptedEmbedder::default()), index, store, &EngineConfig::default());

    let response = engine.search(&SearchRequest::semantic("q", 5)).await.unwrap();
    assert_eq!(ids(&response), vec!["kept"]);
}

#[tokio::test]
async fn stats_report_counts_and_configuration() {
    let h = harness(ScriptedEmbedder::default(), &EngineConfig::default());
    let mut other_user = chunk("b", "bravo", &[]);
    other_user.user_id = "u2".into();
    h.indexer.index_chunks(vec![chunk("a", "alpha", &[]), other_user]).unwrap();

    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.collection_name, "document_chunks");
    assert_eq!(stats.embedding_dimension, 2);
    assert_eq!(stats.embedding_model, "scripted");
    assert_eq!(stats.chunk_size, 1000);
    assert_eq!(stats.similarity_threshold, 0.5);
    assert_eq!(h.indexer.stats().unwrap(), stats);
    assert_eq!(h.index.len().unwrap(), 2);
}

#[tokio::test]
async fn response_serializes_for_the_calling_layer() {
    let h = harness(ScriptedEmbedder::default(), &EngineConfig::default());
    h.indexer.index_chunks(vec![chunk("a", "alpha", &["invoice"])]).unwrap();
    let response = h.engine.search(&SearchRequest::semantic("q", 1)).await.unwrap();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["total_results"], 1);
    assert_eq!(json["results"][0]["chunk_id"], "a");
    assert_eq!(json["results"][0]["metadata"]["source"], "pdf");
    assert_eq!(json["results"][0]["metadata"]["tags"][0], "invoice");
    assert!(json["query_time_ms"].is_number());
}

#[tokio::test]
async fn missing_records_are_backfilled_from_lower_ranks() {
    let index = Arc::new(MemoryAnnIndex::new(2));
    let store = Arc::new(MemoryMetadataStore::new());
    index.upsert("orphan", &[1.0, 0.0]).unwrap();
    index.upsert("kept1", &at_similarity(0.9)).unwrap();
    index.upsert("kept2", &at_similarity(0.8)).unwrap();
    store.upsert(&chunk("kept1", "one", &["t"])).unwrap();
    store.upsert(&chunk("kept2", "two", &["t"])).unwrap();
    let engine = RetrievalEngine::new(Arc::new(ScriptedEmbedder::default()), index, store, &EngineConfig::default());

    let response = engine.search(&SearchRequest::semantic("q", 2)).await.unwrap();
    assert_eq!(ids(&response), vec!["kept1", "kept2"]);

    // At weight 1 the orphan still ranks first on similarity alone.
    let hybrid = SearchRequest::hybrid("q", FilterSpec::default().with_tags(["t"]), 2, 1.0);
    let response = engine.search(&hybrid).await.unwrap();
    assert_eq!(ids(&response), vec!["kept1", "kept2"]);
}

/// Records how many ids each `fetch` asks for.
struct CountingStore {
    inner: MemoryMetadataStore,
    fetched: Mutex<Vec<usize>>,
}

impl MetadataStore for CountingStore {
    fn upsert(&self, chunk: &Chunk) -> chunkdb_core::Result<()> {
        self.inner.upsert(chunk)
    }

    fn scan(&self, predicate: &Predicate) -> chunkdb_core::Result<Vec<ChunkId>> {
        self.inner.scan(predicate)
    }

    fn scan_dated(&self, predicate: &Predicate) -> chunkdb_core::Result<Vec<FilterHit>> {
        self.inner.scan_dated(predicate)
    }

    fn fetch(&self, ids: &[ChunkId]) -> chunkdb_core::Result<Vec<Chunk>> {
        self.fetched.lock().unwrap().push(ids.len());
        self.inner.fetch(ids)
    }

    fn stats(&self) -> chunkdb_core::Result<StoreStats> {
        self.inner.stats()
    }
}

#[tokio::test]
async fn metadata_browse_loads_only_returned_records() {
    let store = Arc::new(CountingStore { inner: MemoryMetadataStore::new(), fetched: Mutex::new(Vec::new()) });
    for (i, id) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        let mut c = chunk(id, id, &[]);
        c.metadata.created_at = Some(Utc.with_ymd_and_hms(2024, 5, 1 + i as u32, 0, 0, 0).unwrap());
        store.upsert(&c).unwrap();
    }
    let engine = RetrievalEngine::new(
        Arc::new(ScriptedEmbedder::default()),
        Arc::new(MemoryAnnIndex::new(2)),
        store.clone(),
        &EngineConfig::default(),
    );

    let response = engine.search(&SearchRequest::metadata(FilterSpec::default(), 2)).await.unwrap();
    assert_eq!(ids(&response), vec!["e", "d"]);
    assert_eq!(*store.fetched.lock().unwrap(), vec![2]);
}
