//! Hybrid retrieval over chunk embeddings and chunk metadata.
//!
//! [`Indexer`] turns page text into indexed chunks; [`RetrievalEngine`]
//! answers semantic, metadata-only and weighted hybrid queries, with the
//! fusion itself in [`combiner`].

pub mod backends;
pub mod combiner;
pub mod indexer;
pub mod orchestrator;
pub mod stats;

pub use backends::Backends;
pub use combiner::{combine, FilterHit, Ranked, Signals, Weight};
pub use indexer::{IndexReport, Indexer};
pub use orchestrator::{PlannedQuery, QueryPlan, RetrievalEngine};
pub use stats::IndexStats;
