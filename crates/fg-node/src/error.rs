use fg_pack::{PackError, PublishError};
use fg_root::RootError;
use fg_store::StoreError;
use fg_types::FeedId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("feed not registered: {0}")]
    FeedNotFound(FeedId),

    #[error("node is closed")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Root(#[from] RootError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

pub type NodeResult<T> = Result<T, NodeError>;
