//! Shared model for the chunk retrieval engine: records, filters, the
//! capability traits the engine talks to, configuration and chunking.

pub mod chunker;
pub mod config;
pub mod error;
pub mod filter;
pub mod math;
pub mod segmenter;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
