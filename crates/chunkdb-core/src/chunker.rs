//! Turning extracted page text into retrieval chunks.
//!
//! [`SemanticChunker`] is the default policy: sentences are embedded and a
//! new chunk starts whenever the topic drifts (similarity to the previous
//! sentence drops below the threshold) or the soft size budget would be
//! exceeded. [`FixedChunker`] is the legacy sliding-window policy kept as a
//! fallback. Both produce chunks without embeddings or `created_at`; the
//! indexer fills those in.
use std::sync::Arc;
use tracing::debug;

use crate::config::{ChunkingConfig, ChunkingStrategy};
use crate::error::{Error, Result};
use crate::math::cosine_similarity;
use crate::segmenter::SentenceSegmenter;
use crate::traits::EmbeddingProvider;
use crate::types::{Chunk, ChunkMetadata, Embedding, PageContext};

pub trait Chunker: Send + Sync {
    /// Split one page of text into chunks with `chunk_index` 0, 1, 2, ...
    /// Whitespace-only text yields an empty vector.
    fn chunk(&self, text: &str, page: &PageContext) -> Result<Vec<Chunk>>;

    fn name(&self) -> &'static str;
}

/// Build the configured chunker.
pub fn chunker_for(config: &ChunkingConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Box<dyn Chunker>> {
    config.validate()?;
    Ok(match config.strategy {
        ChunkingStrategy::Semantic => Box::new(SemanticChunker::new(provider, config)),
        ChunkingStrategy::Fixed => Box::new(FixedChunker::new(config.target_chunk_size, config.chunk_overlap)?),
    })
}

pub struct SemanticChunker {
    provider: Arc<dyn EmbeddingProvider>,
    segmenter: SentenceSegmenter,
    similarity_threshold: f32,
    target_chunk_size: usize,
    embed_batch_size: usize,
}

impl SemanticChunker {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &ChunkingConfig) -> Self {
        Self {
            provider,
            segmenter: SentenceSegmenter::new(&config.abbreviations),
            similarity_threshold: config.similarity_threshold,
            target_chunk_size: config.target_chunk_size.max(1),
            embed_batch_size: config.embed_batch_size.max(1),
        }
    }

    /// Embed every sentence, batch by batch. Any provider failure aborts the
    /// whole call.
    fn embed_sentences(&self, sentences: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(sentences.len());
        for batch in sentences.chunks(self.embed_batch_size) {
            let vectors = self.provider.embed_batch(batch)?;
            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} sentences",
                    vectors.len(),
                    batch.len()
                )));
            }
            out.extend(vectors);
        }
        if let Some(first) = out.first() {
            let dim = first.len();
            if let Some(bad) = out.iter().find(|v| v.len() != dim) {
                return Err(Error::DimensionMismatch { expected: dim, got: bad.len() });
            }
        }
        Ok(out)
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, text: &str, page: &PageContext) -> Result<Vec<Chunk>> {
        let sentences: Vec<String> = self.segmenter.segment(text).into_iter().map(|s| s.text).collect();
        if sentences.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed_sentences(&sentences)?;
        let contents = group_sentences(&sentences, &embeddings, self.similarity_threshold, self.target_chunk_size);
        debug!(
            document_id = %page.document_id,
            page = page.page_number,
            sentences = sentences.len(),
            chunks = contents.len(),
            "semantic chunking complete"
        );
        Ok(build_chunks(contents, page))
    }

    fn name(&self) -> &'static str {
        "semantic"
    }
}

/// Walk sentences in order, keeping an open buffer. A sentence joins the
/// buffer only if it is similar enough to the last sentence added and the
/// joined text stays within `target_chunk_size` characters; otherwise the
/// buffer is closed. A sentence longer than the budget still becomes a chunk
/// of its own, never split.
pub fn group_sentences(
    sentences: &[String],
    embeddings: &[Embedding],
    similarity_threshold: f32,
    target_chunk_size: usize,
) -> Vec<String> {
    debug_assert_eq!(sentences.len(), embeddings.len());
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffer_chars = 0usize;
    let mut last_embedding: Option<&Embedding> = None;

    for (sentence, embedding) in sentences.iter().zip(embeddings) {
        let len = sentence.chars().count();
        let joins = match last_embedding {
            None => false,
            Some(prev) => {
                cosine_similarity(prev, embedding) >= similarity_threshold
                    && buffer_chars + 1 + len <= target_chunk_size
            }
        };
        if joins {
            buffer.push(sentence);
            buffer_chars += 1 + len;
        } else {
            if !buffer.is_empty() {
                chunks.push(buffer.join(" "));
                buffer.clear();
            }
            buffer.push(sentence);
            buffer_chars = len;
        }
        last_embedding = Some(embedding);
    }
    if !buffer.is_empty() {
        chunks.push(buffer.join(" "));
    }
    chunks
}

/// Sliding character windows with `step = chunk_size - overlap`.
/// Windows may cut through sentences.
pub struct FixedChunker {
    chunk_size: usize,
    overlap: usize,
}

impl FixedChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "fixed chunking needs chunk_size > overlap, got size {chunk_size} overlap {overlap}"
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    fn windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        let step = self.chunk_size - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let window = window.trim();
            if !window.is_empty() {
                out.push(window.to_string());
            }
            if end >= chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

impl Chunker for FixedChunker {
    fn chunk(&self, text: &str, page: &PageContext) -> Result<Vec<Chunk>> {
        Ok(build_chunks(self.windows(text), page))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

fn build_chunks(contents: Vec<String>, page: &PageContext) -> Vec<Chunk> {
    contents
        .into_iter()
        .zip(0u32..)
        .map(|(content, chunk_index)| Chunk {
            chunk_id: Chunk::make_id(&page.document_id, page.page_number, chunk_index),
            document_id: page.document_id.clone(),
            user_id: page.user_id.clone(),
            content,
            embedding: None,
            metadata: ChunkMetadata {
                source: page.source,
                page_number: page.page_number,
                chunk_index,
                created_at: None,
                tags: page.tags.clone(),
            },
        })
        .collect()
}
