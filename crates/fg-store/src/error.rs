use fg_types::ObjectId;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A blob the caller required is absent.
    #[error("blob not found: {0}")]
    NotFound(ObjectId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Refused to store under the null id.
    #[error("cannot store blob under the null id")]
    NullKey,

    /// The backend cannot accept writes.
    #[error("store is read-only")]
    ReadOnly,

    /// Lock poisoned or other backend-internal failure.
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
