//! Domain types shared by the chunker, the stores and the retrieval engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::filter::FilterSpec;

pub type ChunkId = String;
pub type Embedding = Vec<f32>;

/// Where the text of a chunk was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Pdf,
    Ocr,
    Image,
    Text,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Pdf, Source::Ocr, Source::Image, Source::Text];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Pdf => "pdf",
            Source::Ocr => "ocr",
            Source::Image => "image",
            Source::Text => "text",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Source::ALL
            .into_iter()
            .find(|src| src.as_str() == wanted)
            .ok_or_else(|| Error::InvalidFilterValue {
                field: "source",
                reason: format!("unknown source '{s}' (expected one of pdf, ocr, image, text)"),
            })
    }
}

/// Structured attributes attached to every chunk.
///
/// - `page_number` is 1-based and inherited from the caller's page context
/// - `chunk_index` restarts at 0 for every `(document_id, page_number)` group
/// - `created_at` is stamped when the chunk is indexed, so freshly chunked
///   records carry `None`
/// - `tags` is a set; duplicates collapse on construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: Source,
    pub page_number: u32,
    pub chunk_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Trim every tag and drop the blank ones. Stored tags and filter tags both
/// go through this, so `" invoice"` and `"invoice"` are the same tag.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter().map(|t| t.as_ref().trim().to_string()).filter(|t| !t.is_empty()).collect()
}

/// The unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// `{document_id}_p{page}_c{index}`
    pub fn make_id(document_id: &str, page_number: u32, chunk_index: u32) -> ChunkId {
        format!("{document_id}_p{page_number}_c{chunk_index}")
    }

    /// Check the record-level invariants a chunk must satisfy before it is
    /// written to a store.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_id.trim().is_empty() {
            return Err(Error::InvalidRequest("chunk_id cannot be empty".into()));
        }
        if self.content.trim().is_empty() {
            return Err(Error::InvalidRequest(format!("chunk '{}' has empty content", self.chunk_id)));
        }
        if self.metadata.page_number < 1 {
            return Err(Error::InvalidRequest(format!("chunk '{}' has page_number 0", self.chunk_id)));
        }
        Ok(())
    }

    /// Bring the record into its stored form: tags normalized.
    pub fn normalize(&mut self) {
        self.metadata.tags = normalize_tags(&self.metadata.tags);
    }
}

/// Caller-supplied context for one page of extracted text. This is the
/// chunk ingestion surface minus the text itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub document_id: String,
    pub user_id: String,
    pub page_number: u32,
    pub source: Source,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl PageContext {
    pub fn new(document_id: impl Into<String>, user_id: impl Into<String>, page_number: u32, source: Source) -> Self {
        Self { document_id: document_id.into(), user_id: user_id.into(), page_number, source, tags: BTreeSet::new() }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = normalize_tags(tags.into_iter().map(Into::into));
        self
    }
}

/// A chunk that satisfied a metadata predicate, with just enough of the
/// record to rank it by recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterHit {
    pub chunk_id: ChunkId,
    pub created_at: Option<DateTime<Utc>>,
}

/// One approximate nearest-neighbour match. `similarity` is raw cosine
/// similarity in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: ChunkId,
    pub similarity: f32,
}

/// Aggregate counts reported by a metadata store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub total_documents: usize,
    pub total_users: usize,
}

pub fn default_top_k() -> usize {
    5
}

pub fn default_weight_vector() -> f32 {
    0.7
}

/// A query as received from the calling layer. At least one of `query` and
/// `filters` must be present; `filters: {}` means "browse everything".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSpec>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_weight_vector")]
    pub weight_vector: f32,
}

impl SearchRequest {
    pub fn semantic(query: impl Into<String>, top_k: usize) -> Self {
        Self { query: Some(query.into()), filters: None, top_k, weight_vector: default_weight_vector() }
    }

    pub fn metadata(filters: FilterSpec, top_k: usize) -> Self {
        Self { query: None, filters: Some(filters), top_k, weight_vector: default_weight_vector() }
    }

    pub fn hybrid(query: impl Into<String>, filters: FilterSpec, top_k: usize, weight_vector: f32) -> Self {
        Self { query: Some(query.into()), filters: Some(filters), top_k, weight_vector }
    }

    /// Parse a JSON request body. Unknown filter fields are reported as
    /// `InvalidFilterField` rather than as a generic parse failure.
    pub fn from_json(body: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::InvalidRequest(format!("malformed request body: {e}")))?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| Error::InvalidRequest("request body must be a JSON object".into()))?;
        let filters = match obj.remove("filters") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(FilterSpec::from_value(&raw)?),
        };
        let mut request: SearchRequest = serde_json::from_value(value)
            .map_err(|e| Error::InvalidRequest(format!("malformed request body: {e}")))?;
        request.filters = filters;
        Ok(request)
    }
}

/// A ranked match returned to the caller. `score` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub user_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

impl SearchResult {
    pub fn from_chunk(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            document_id: chunk.document_id,
            user_id: chunk.user_id,
            content: chunk.content,
            metadata: chunk.metadata,
            score,
        }
    }
}

/// What the outer layer serializes for one search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub query_time_ms: f64,
}

impl SearchResponse {
    pub fn new(results: Vec<SearchResult>, elapsed: std::time::Duration) -> Self {
        let ms = elapsed.as_secs_f64() * 1000.0;
        Self { total_results: results.len(), results, query_time_ms: (ms * 100.0).round() / 100.0 }
    }
}
