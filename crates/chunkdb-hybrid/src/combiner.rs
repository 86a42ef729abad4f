//! Fusion of vector similarity and metadata matches into one ranking.
//!
//! Pure and synchronous. Every score leaving this module is in `[0, 1]` and
//! ties always resolve by ascending `chunk_id`.
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

pub use chunkdb_core::types::FilterHit;
use chunkdb_core::types::{ChunkId, VectorHit};
use chunkdb_core::{Error, Result};

/// Share of the semantic signal in a hybrid score, validated to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Weight(f32);

impl Weight {
    pub fn new(value: f32) -> Result<Self> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(Error::InvalidWeight(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

/// Whichever retrieval legs ran for a request.
#[derive(Debug, Clone, Copy)]
pub enum Signals<'a> {
    Semantic(&'a [VectorHit]),
    Metadata(&'a [FilterHit]),
    Hybrid {
        vector: &'a [VectorHit],
        filter: &'a BTreeSet<ChunkId>,
        weight: Weight,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranked {
    pub chunk_id: ChunkId,
    pub score: f32,
}

fn clamp_unit(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn by_score_then_id(a: &Ranked, b: &Ranked) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Best clamped similarity per id; an index may in principle repeat an id.
fn semantic_scores(hits: &[VectorHit]) -> HashMap<&str, f32> {
    let mut scores: HashMap<&str, f32> = HashMap::with_capacity(hits.len());
    for hit in hits {
        let s = clamp_unit(hit.similarity);
        scores.entry(hit.chunk_id.as_str()).and_modify(|old| *old = old.max(s)).or_insert(s);
    }
    scores
}

fn into_ranked(scores: HashMap<&str, f32>) -> Vec<Ranked> {
    scores.into_iter().map(|(id, score)| Ranked { chunk_id: id.to_string(), score }).collect()
}

/// Rank candidates and keep the best `top_k`.
///
/// - semantic: score is the similarity clamped to `[0, 1]`
/// - metadata: every hit scores 1.0, newest `created_at` first (unstamped
///   records last)
/// - hybrid: `s * w + m * (1 - w)` where `s` is the clamped similarity (0 if
///   the id was not a vector hit) and `m` is 1 for filter matches. A
///   candidate only enters through a leg whose weight is non-zero, so
///   `w = 1` reproduces the semantic ranking and `w = 0` the filter set
pub fn combine(signals: Signals<'_>, top_k: usize) -> Vec<Ranked> {
    let mut ranked = match signals {
        Signals::Semantic(hits) => {
            let mut ranked = into_ranked(semantic_scores(hits));
            ranked.sort_by(by_score_then_id);
            ranked
        }
        Signals::Metadata(hits) => {
            let mut hits: Vec<&FilterHit> = hits.iter().collect();
            hits.sort_by(|a, b| {
                // Some(_) > None, so newest first puts unstamped records last.
                b.created_at.cmp(&a.created_at).then_with(|| a.chunk_id.cmp(&b.chunk_id))
            });
            let mut seen = HashSet::new();
            hits.retain(|h| seen.insert(h.chunk_id.as_str()));
            hits.into_iter().map(|h| Ranked { chunk_id: h.chunk_id.clone(), score: 1.0 }).collect()
        }
        Signals::Hybrid { vector, filter, weight } => {
            let w = weight.value();
            let semantic = semantic_scores(vector);
            let mut candidates: BTreeSet<&str> = BTreeSet::new();
            if w > 0.0 {
                candidates.extend(semantic.keys().copied());
            }
            if w < 1.0 {
                candidates.extend(filter.iter().map(String::as_str));
            }
            let mut ranked: Vec<Ranked> = candidates
                .into_iter()
                .map(|id| {
                    let s = semantic.get(id).copied().unwrap_or(0.0);
                    let m = if filter.contains(id) { 1.0 } else { 0.0 };
                    Ranked { chunk_id: id.to_string(), score: clamp_unit(s * w + m * (1.0 - w)) }
                })
                .collect();
            ranked.sort_by(by_score_then_id);
            ranked
        }
    };
    ranked.truncate(top_k);
    ranked
}
