use fg_root::Root;
use thiserror::Error;

/// Receives every root a pack saves.
///
/// Publication happens after the root is recorded. A failure here is
/// logged by the pack and does not undo the save.
pub trait Publisher: Send + Sync {
    /// Returns how many subscribers the root reached.
    fn publish(&self, root: &Root) -> Result<usize, PublishError>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher is closed")]
    Closed,

    #[error("feed not registered with publisher: {0}")]
    UnknownFeed(fg_types::FeedId),
}
