//! Both store implementations must give identical answers; every case runs
//! against each of them.
use chrono::{Datelike, TimeZone, Utc};

use chunkdb_core::filter::{build_predicate, FilterSpec, Predicate};
use chunkdb_core::traits::MetadataStore;
use chunkdb_core::types::{Chunk, ChunkMetadata, Source};
use chunkdb_meta::{MemoryMetadataStore, TantivyMetadataStore};

fn chunk(doc: &str, user: &str, page: u32, idx: u32, source: Source, tags: &[&str]) -> Chunk {
    Chunk {
        chunk_id: Chunk::make_id(doc, page, idx),
        document_id: doc.to_string(),
        user_id: user.to_string(),
        content: format!("{doc} page {page} chunk {idx}"),
        embedding: Some(vec![0.1, 0.2]),
        metadata: ChunkMetadata {
            source,
            page_number: page,
            chunk_index: idx,
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 1 + idx, 0, 0, 0).unwrap()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        },
    }
}

fn corpus() -> Vec<Chunk> {
    vec![
        chunk("inv", "u1", 1, 0, Source::Pdf, &["invoice", "2024"]),
        chunk("inv", "u1", 1, 1, Source::Pdf, &["invoice"]),
        chunk("inv", "u1", 2, 0, Source::Pdf, &[]),
        chunk("scan", "u1", 1, 0, Source::Ocr, &["receipt"]),
        chunk("photo", "u2", 1, 0, Source::Image, &["receipt", "travel"]),
    ]
}

fn stores() -> Vec<(&'static str, Box<dyn MetadataStore>, Option<tempfile::TempDir>)> {
    let tmp = tempfile::tempdir().unwrap();
    let tantivy = TantivyMetadataStore::open(tmp.path()).unwrap();
    vec![
        ("memory", Box::new(MemoryMetadataStore::new()), None),
        ("tantivy", Box::new(tantivy), Some(tmp)),
    ]
}

fn scan(store: &dyn MetadataStore, spec: FilterSpec) -> Vec<String> {
    store.scan(&build_predicate(&spec).unwrap()).unwrap()
}

#[test]
fn scan_applies_and_across_fields_or_within_tags() {
    for (name, store, _guard) in stores() {
        store.upsert_batch(&corpus()).unwrap();

        assert_eq!(
            scan(store.as_ref(), FilterSpec::default().with_source("pdf").with_page_number(1)),
            vec!["inv_p1_c0", "inv_p1_c1"],
            "{name}"
        );
        assert_eq!(
            scan(store.as_ref(), FilterSpec::default().with_tags(["receipt", "2024"])),
            vec!["inv_p1_c0", "photo_p1_c0", "scan_p1_c0"],
            "{name}"
        );
        assert_eq!(
            scan(store.as_ref(), FilterSpec::default().with_user_id("u1").with_tags(["receipt"])),
            vec!["scan_p1_c0"],
            "{name}"
        );
        assert!(scan(store.as_ref(), FilterSpec::default().with_document_id("INV")).is_empty(), "{name}");
    }
}

#[test]
fn empty_filter_returns_every_id_sorted() {
    for (name, store, _guard) in stores() {
        store.upsert_batch(&corpus()).unwrap();
        let all = store.scan(&Predicate::default()).unwrap();
        let mut expected: Vec<String> = corpus().into_iter().map(|c| c.chunk_id).collect();
        expected.sort();
        assert_eq!(all, expected, "{name}");
    }
}

#[test]
fn fetch_preserves_request_order_and_skips_unknown() {
    for (name, store, _guard) in stores() {
        store.upsert_batch(&corpus()).unwrap();
        let ids = vec!["scan_p1_c0".to_string(), "missing".to_string(), "inv_p1_c0".to_string()];
        let got = store.fetch(&ids).unwrap();
        let got_ids: Vec<_> = got.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(got_ids, vec!["scan_p1_c0", "inv_p1_c0"], "{name}");

        let first = &got[1];
        let original = &corpus()[0];
        assert_eq!(first.content, original.content, "{name}");
        assert_eq!(first.metadata, original.metadata, "{name}");
        assert!(first.embedding.is_none(), "{name}: stores do not keep vectors");
    }
}

#[test]
fn upsert_replaces_record() {
    for (name, store, _guard) in stores() {
        let mut c = chunk("inv", "u1", 1, 0, Source::Pdf, &["old"]);
        store.upsert(&c).unwrap();
        c.metadata.tags = ["new".to_string()].into_iter().collect();
        c.content = "updated".into();
        store.upsert(&c).unwrap();

        assert!(scan(store.as_ref(), FilterSpec::default().with_tags(["old"])).is_empty(), "{name}");
        assert_eq!(scan(store.as_ref(), FilterSpec::default().with_tags(["new"])), vec!["inv_p1_c0"], "{name}");
        assert_eq!(store.fetch(&[c.chunk_id.clone()]).unwrap()[0].content, "updated", "{name}");
        assert_eq!(store.stats().unwrap().total_chunks, 1, "{name}");
    }
}

#[test]
fn stats_count_distinct_documents_and_users() {
    for (name, store, _guard) in stores() {
        assert_eq!(store.stats().unwrap().total_chunks, 0, "{name}");
        store.upsert_batch(&corpus()).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_chunks, 5, "{name}");
        assert_eq!(stats.total_documents, 3, "{name}");
        assert_eq!(stats.total_users, 2, "{name}");
    }
}

#[test]
fn tantivy_records_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = TantivyMetadataStore::open(tmp.path()).unwrap();
        store.upsert_batch(&corpus()).unwrap();
    }
    let store = TantivyMetadataStore::open(tmp.path()).unwrap();
    assert_eq!(store.stats().unwrap().total_chunks, 5);
    assert_eq!(scan(&store, FilterSpec::default().with_source("image")), vec!["photo_p1_c0"]);
}

#[test]
fn padded_tags_match_their_trimmed_form() {
    for (name, store, _guard) in stores() {
        store.upsert(&chunk("inv", "u1", 1, 0, Source::Pdf, &[" invoice", "  ", "paid "])).unwrap();

        assert_eq!(scan(store.as_ref(), FilterSpec::default().with_tags([" invoice"])), vec!["inv_p1_c0"], "{name}");
        assert_eq!(scan(store.as_ref(), FilterSpec::default().with_tags(["invoice"])), vec!["inv_p1_c0"], "{name}");
        assert_eq!(scan(store.as_ref(), FilterSpec::default().with_tags(["paid"])), vec!["inv_p1_c0"], "{name}");

        let stored = store.fetch(&["inv_p1_c0".to_string()]).unwrap();
        let tags: Vec<&str> = stored[0].metadata.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["invoice", "paid"], "{name}");
    }
}

#[test]
fn dated_scan_carries_created_at() {
    for (name, store, _guard) in stores() {
        let mut unstamped = chunk("note", "u3", 1, 0, Source::Text, &["invoice"]);
        unstamped.metadata.created_at = None;
        store.upsert_batch(&corpus()).unwrap();
        store.upsert(&unstamped).unwrap();

        let hits = store.scan_dated(&build_predicate(&FilterSpec::default().with_tags(["invoice"])).unwrap()).unwrap();
        let got: Vec<(&str, Option<u32>)> =
            hits.iter().map(|h| (h.chunk_id.as_str(), h.created_at.map(|t| t.day()))).collect();
        assert_eq!(got, vec![("inv_p1_c0", Some(1)), ("inv_p1_c1", Some(2)), ("note_p1_c0", None)], "{name}");
    }
}
