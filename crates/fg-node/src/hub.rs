use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use fg_pack::{PublishError, Publisher};
use fg_root::Root;
use fg_types::FeedId;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Receiver of the roots published on one feed.
pub type RootStream = broadcast::Receiver<Root>;

/// Per-feed fan-out of roots to subscribers.
///
/// Each registered feed has one broadcast channel. Publishing never blocks:
/// a subscriber that falls more than `capacity` roots behind sees
/// `RecvError::Lagged` and skips ahead.
pub struct FeedHub {
    channels: RwLock<HashMap<FeedId, broadcast::Sender<Root>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl FeedHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a channel for `feed`. Registering twice keeps the first channel.
    pub fn register(&self, feed: FeedId) {
        if let Ok(mut channels) = self.channels.write() {
            channels
                .entry(feed)
                .or_insert_with(|| broadcast::channel(self.capacity).0);
        }
    }

    pub fn unregister(&self, feed: &FeedId) {
        if let Ok(mut channels) = self.channels.write() {
            channels.remove(feed);
        }
    }

    pub fn subscribe(&self, feed: &FeedId) -> Option<RootStream> {
        let channels = self.channels.read().ok()?;
        channels.get(feed).map(broadcast::Sender::subscribe)
    }

    pub fn subscriber_count(&self, feed: &FeedId) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|c| c.get(feed).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }

    /// Stop accepting roots and drop every channel, which ends all streams.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut channels) = self.channels.write() {
            channels.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Publisher for FeedHub {
    fn publish(&self, root: &Root) -> Result<usize, PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        let channels = self.channels.read().map_err(|_| PublishError::Closed)?;
        let sender = channels
            .get(&root.feed)
            .ok_or(PublishError::UnknownFeed(root.feed))?;
        // Sending with no subscribers is not a failure; nobody is listening yet.
        let reached = sender.send(root.clone()).unwrap_or(0);
        trace!(feed = %root.feed, seq = root.seq, reached, "root fanned out");
        Ok(reached)
    }
}

impl std::fmt::Debug for FeedHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let feeds = self.channels.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("FeedHub")
            .field("feeds", &feeds)
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for FeedHub {
    fn drop(&mut self) {
        debug!(closed = self.is_closed(), "feed hub dropped");
    }
}
