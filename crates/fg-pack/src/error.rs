use fg_crypto::SignatureError;
use fg_object::ObjectError;
use fg_root::RootError;
use fg_store::StoreError;
use fg_types::FeedId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    /// The root names schemas this process cannot decode.
    #[error("registry mismatch: {0}")]
    RegistryMismatch(String),

    #[error("slot {index} holds {actual}, not {expected}")]
    SchemaMismatch {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("pack is closed")]
    Closed,

    #[error("pack is view-only")]
    ViewOnly,

    #[error("feed {0} already has an open pack")]
    FeedBusy(FeedId),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Root(#[from] RootError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("feed lease table lock poisoned")]
    LockPoisoned,
}

pub type PackResult<T> = Result<T, PackError>;
