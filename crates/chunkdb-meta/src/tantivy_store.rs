use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use chunkdb_core::filter::Predicate;
use chunkdb_core::traits::MetadataStore;
use chunkdb_core::types::{normalize_tags, Chunk, ChunkId, ChunkMetadata, FilterHit, Source, StoreStats};
use chunkdb_core::{Error, Result};

use crate::tantivy_utils::{build_schema, resolve_fields, ChunkFields};

const WRITER_MEMORY_BYTES: usize = 50_000_000;

fn unavailable(e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(e.to_string())
}

/// Chunk records in a tantivy index. Upserts replace by `chunk_id` and are
/// visible to the next read once the call returns.
pub struct TantivyMetadataStore {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: ChunkFields,
}

impl TantivyMetadataStore {
    /// Open the index in `index_dir`, creating it if missing.
    pub fn open(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir).map_err(unavailable)?;
        let dir = MmapDirectory::open(index_dir).map_err(unavailable)?;
        let index = Index::open_or_create(dir, build_schema()).map_err(unavailable)?;
        info!(dir = %index_dir.display(), "opened tantivy metadata store");
        Self::from_index(index)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let fields = resolve_fields(&index.schema()).map_err(unavailable)?;
        let writer = index.writer(WRITER_MEMORY_BYTES).map_err(unavailable)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(unavailable)?;
        Ok(Self { index, reader, writer: Mutex::new(writer), fields })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn to_document(&self, chunk: &Chunk) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.chunk_id, &chunk.chunk_id);
        doc.add_text(f.document_id, &chunk.document_id);
        doc.add_text(f.user_id, &chunk.user_id);
        doc.add_text(f.source, chunk.metadata.source.as_str());
        doc.add_u64(f.page_number, u64::from(chunk.metadata.page_number));
        doc.add_u64(f.chunk_index, u64::from(chunk.metadata.chunk_index));
        for tag in normalize_tags(&chunk.metadata.tags) {
            doc.add_text(f.tags, &tag);
        }
        if let Some(ts) = chunk.metadata.created_at {
            doc.add_i64(f.created_at, ts.timestamp_millis());
        }
        doc.add_text(f.content, &chunk.content);
        doc
    }

    fn from_document(&self, doc: &TantivyDocument) -> Result<Chunk> {
        let f = &self.fields;
        let text = |field| doc.get_first(field).and_then(|v| v.as_str()).map(str::to_string);
        let chunk_id = text(f.chunk_id).ok_or_else(|| Error::StoreUnavailable("stored chunk without chunk_id".into()))?;
        let source: Source = text(f.source)
            .ok_or_else(|| Error::StoreUnavailable(format!("chunk '{chunk_id}' has no source")))?
            .parse()
            .map_err(|_| Error::StoreUnavailable(format!("chunk '{chunk_id}' has an unknown source")))?;
        let page_number = doc.get_first(f.page_number).and_then(|v| v.as_u64()).unwrap_or(0);
        let chunk_index = doc.get_first(f.chunk_index).and_then(|v| v.as_u64()).unwrap_or(0);
        let created_at = self.stored_created_at(doc);
        let tags: BTreeSet<String> = doc.get_all(f.tags).filter_map(|v| v.as_str().map(str::to_string)).collect();

        Ok(Chunk {
            document_id: text(f.document_id).unwrap_or_default(),
            user_id: text(f.user_id).unwrap_or_default(),
            content: text(f.content).unwrap_or_default(),
            embedding: None,
            metadata: ChunkMetadata {
                source,
                page_number: u32::try_from(page_number).map_err(unavailable)?,
                chunk_index: u32::try_from(chunk_index).map_err(unavailable)?,
                created_at,
                tags,
            },
            chunk_id,
        })
    }

    /// Exact-match clauses are ANDed; the tag clause is an OR group nested
    /// inside the conjunction.
    fn build_query(&self, predicate: &Predicate) -> Box<dyn Query> {
        if predicate.matches_everything() {
            return Box::new(AllQuery);
        }
        let f = &self.fields;
        let term = |t: Term| -> Box<dyn Query> { Box::new(TermQuery::new(t, IndexRecordOption::Basic)) };
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        if let Some(source) = predicate.source {
            clauses.push((Occur::Must, term(Term::from_field_text(f.source, source.as_str()))));
        }
        if let Some(page) = predicate.page_number {
            clauses.push((Occur::Must, term(Term::from_field_u64(f.page_number, u64::from(page)))));
        }
        if let Some(doc) = &predicate.document_id {
            clauses.push((Occur::Must, term(Term::from_field_text(f.document_id, doc))));
        }
        if let Some(user) = &predicate.user_id {
            clauses.push((Occur::Must, term(Term::from_field_text(f.user_id, user))));
        }
        if let Some(tags) = &predicate.any_tags {
            let any: Vec<(Occur, Box<dyn Query>)> =
                tags.iter().map(|t| (Occur::Should, term(Term::from_field_text(f.tags, t)))).collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(any))));
        }
        Box::new(BooleanQuery::new(clauses))
    }

    fn matching_docs(&self, query: &dyn Query) -> Result<Vec<TantivyDocument>> {
        let searcher = self.reader.searcher();
        let addrs = searcher.search(query, &DocSetCollector).map_err(unavailable)?;
        addrs
            .into_iter()
            .map(|addr| searcher.doc::<TantivyDocument>(addr).map_err(unavailable))
            .collect()
    }

    fn stored_id(&self, doc: &TantivyDocument) -> Option<String> {
        doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str()).map(str::to_string)
    }

    fn stored_created_at(&self, doc: &TantivyDocument) -> Option<DateTime<Utc>> {
        doc.get_first(self.fields.created_at).and_then(|v| v.as_i64()).and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

impl MetadataStore for TantivyMetadataStore {
    fn upsert(&self, chunk: &Chunk) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(chunk))
    }

    fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().map_err(|_| Error::StoreUnavailable("writer lock poisoned".into()))?;
        for chunk in chunks {
            writer.delete_term(Term::from_field_text(self.fields.chunk_id, &chunk.chunk_id));
            writer.add_document(self.to_document(chunk)).map_err(unavailable)?;
        }
        writer.commit().map_err(unavailable)?;
        self.reader.reload().map_err(unavailable)?;
        debug!(rows = chunks.len(), "upserted chunk records");
        Ok(())
    }

    fn scan(&self, predicate: &Predicate) -> Result<Vec<ChunkId>> {
        let query = self.build_query(predicate);
        let ids: BTreeSet<ChunkId> = self
            .matching_docs(query.as_ref())?
            .iter()
            .filter_map(|doc| self.stored_id(doc))
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn scan_dated(&self, predicate: &Predicate) -> Result<Vec<FilterHit>> {
        let query = self.build_query(predicate);
        let mut hits: Vec<FilterHit> = self
            .matching_docs(query.as_ref())?
            .iter()
            .filter_map(|doc| {
                let chunk_id = self.stored_id(doc)?;
                Some(FilterHit { chunk_id, created_at: self.stored_created_at(doc) })
            })
            .collect();
        hits.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        hits.dedup_by(|a, b| a.chunk_id == b.chunk_id);
        Ok(hits)
    }

    fn fetch(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: Vec<(Occur, Box<dyn Query>)> = ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|id| {
                let q: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.chunk_id, id),
                    IndexRecordOption::Basic,
                ));
                (Occur::Should, q)
            })
            .collect();
        let mut by_id: HashMap<ChunkId, Chunk> = HashMap::new();
        for doc in self.matching_docs(&BooleanQuery::new(wanted))? {
            let chunk = self.from_document(&doc)?;
            by_id.insert(chunk.chunk_id.clone(), chunk);
        }
        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let f = &self.fields;
        let docs = self.matching_docs(&AllQuery)?;
        let mut documents = HashSet::new();
        let mut users = HashSet::new();
        for doc in &docs {
            if let Some(d) = doc.get_first(f.document_id).and_then(|v| v.as_str()) {
                documents.insert(d.to_string());
            }
            if let Some(u) = doc.get_first(f.user_id).and_then(|v| v.as_str()) {
                users.insert(u.to_string());
            }
        }
        Ok(StoreStats { total_chunks: docs.len(), total_documents: documents.len(), total_users: users.len() })
    }
}
