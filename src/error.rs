pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed document on line {line}: {source}")]
    MalformedDocument {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("tensor computation error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("embedding provider failed: {0}")]
    ProviderError(String),

    #[error("collection '{collection}' has an incompatible schema: {reason}")]
    SchemaConflict { collection: String, reason: String },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector store unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("point {id} has no '{field}' field in its payload")]
    MissingField { id: u64, field: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid vector: {0}")]
    InvalidVector(String),
}

impl Error {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RetrievalUnavailable(_))
    }
}

macro_rules! store_unavailable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::RetrievalUnavailable(e.to_string())
                }
            }
        )+
    };
}

store_unavailable!(
    redb::Error,
    redb::DatabaseError,
    redb::StorageError,
    redb::TransactionError,
    redb::TableError,
    redb::CommitError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_failures_are_retryable() {
        assert!(Error::RetrievalUnavailable("down".into()).is_retryable());
        assert!(!Error::CollectionNotFound("x".into()).is_retryable());
        assert!(!Error::InvalidQuery("empty".into()).is_retryable());
    }

    #[test]
    fn storage_errors_become_unavailable() {
        let err: Error = redb::StorageError::Io(std::io::Error::other("disk"))
            .into();
        assert!(matches!(err, Error::RetrievalUnavailable(_)));
    }
}
