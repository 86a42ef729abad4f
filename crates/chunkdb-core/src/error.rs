use thiserror::Error;

/// Failures surfaced by the retrieval engine and its collaborators.
///
/// The first group rejects a request before any work happens and is never
/// worth retrying. The `*Unavailable` group reports dependency failures; the
/// engine does not retry them internally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid filter field: '{0}'")]
    InvalidFilterField(String),

    #[error("Invalid filter value for '{field}': {reason}")]
    InvalidFilterValue { field: &'static str, reason: String },

    #[error("Invalid weight_vector {0}: expected a value in [0, 1]")]
    InvalidWeight(f32),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("ANN index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Retrieval unavailable during {stage}: {source}")]
    RetrievalUnavailable {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for the request-validation family; these map to a client error in
    /// any outer layer.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_)
                | Error::InvalidFilterField(_)
                | Error::InvalidFilterValue { .. }
                | Error::InvalidWeight(_)
        )
    }

    /// Wrap a dependency failure raised while serving a query.
    pub fn retrieval(stage: &'static str, source: Error) -> Self {
        match source {
            already @ Error::RetrievalUnavailable { .. } => already,
            other => Error::RetrievalUnavailable { stage, source: Box::new(other) },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
