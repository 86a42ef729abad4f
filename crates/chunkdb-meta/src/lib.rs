//! Structured chunk stores answering metadata predicates.
//!
//! [`TantivyMetadataStore`] keeps every chunk record in an on-disk tantivy
//! index with exact-match fields; [`MemoryMetadataStore`] is the in-process
//! equivalent used by tests.

pub mod memory;
pub mod tantivy_store;
pub mod tantivy_utils;

pub use memory::MemoryMetadataStore;
pub use tantivy_store::TantivyMetadataStore;
