use fg_crypto::{ChainError, SignatureError};
use fg_store::StoreError;
use fg_types::FeedId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RootError {
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    /// The root does not extend the feed's current head.
    #[error("chain violation on {feed} at seq {seq}: {reason}")]
    ChainViolation { feed: FeedId, seq: u64, reason: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("feed not registered: {0}")]
    FeedNotFound(FeedId),

    #[error("no root with seq {seq} on {feed}")]
    RootNotFound { feed: FeedId, seq: u64 },

    #[error("root encoding error: {0}")]
    Encoding(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("root manager lock poisoned")]
    LockPoisoned,
}

pub type RootResult<T> = Result<T, RootError>;
