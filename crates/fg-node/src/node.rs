use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fg_object::Registry;
use fg_pack::{Container, Publisher};
use fg_root::{Root, RootManager};
use fg_store::{BlobStore, FsBlobStore, InMemoryBlobStore};
use fg_types::FeedId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::hub::{FeedHub, RootStream};

/// One feedgraph process: storage, feeds, and publication.
pub struct Node {
    config: NodeConfig,
    container: Container,
    hub: Arc<FeedHub>,
    quit: CancellationToken,
    closed: AtomicBool,
}

impl Node {
    pub fn new(config: NodeConfig, registry: Arc<Registry>) -> NodeResult<Self> {
        config.validate()?;
        let store: Arc<dyn BlobStore> = if config.in_memory {
            Arc::new(InMemoryBlobStore::new())
        } else {
            Arc::new(FsBlobStore::open(config.blob_dir())?)
        };
        let roots = Arc::new(RootManager::new(Arc::clone(&store)));
        let hub = Arc::new(FeedHub::new(config.publish_capacity));
        let container = Container::new(store, registry, roots).with_publisher(hub.clone());

        info!(
            in_memory = config.in_memory,
            data_dir = %config.data_dir.display(),
            "node started"
        );
        Ok(Self {
            config,
            container,
            hub,
            quit: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn roots(&self) -> &Arc<RootManager> {
        self.container.roots()
    }

    pub fn hub(&self) -> &Arc<FeedHub> {
        &self.hub
    }

    /// Register a feed with the root manager and open its channel.
    pub fn add_feed(&self, feed: FeedId) -> NodeResult<bool> {
        self.ensure_open()?;
        let added = self.roots().add_feed(feed)?;
        self.hub.register(feed);
        Ok(added)
    }

    /// Forget a feed and end its subscriptions. Stored roots are kept.
    pub fn del_feed(&self, feed: &FeedId) -> NodeResult<bool> {
        self.ensure_open()?;
        let removed = self.roots().del_feed(feed)?;
        self.hub.unregister(feed);
        Ok(removed)
    }

    pub fn feeds(&self) -> Vec<FeedId> {
        self.roots().feeds()
    }

    pub fn subscribe(&self, feed: &FeedId) -> NodeResult<RootStream> {
        self.ensure_open()?;
        self.hub
            .subscribe(feed)
            .ok_or(NodeError::FeedNotFound(*feed))
    }

    /// Fan a root out to the feed's subscribers.
    pub fn publish(&self, root: &Root) -> NodeResult<usize> {
        self.ensure_open()?;
        Ok(self.hub.publish(root)?)
    }

    /// Accept an encoded root from elsewhere.
    ///
    /// The root must belong to a registered feed and extend its chain. It is
    /// recorded before it is forwarded to local subscribers.
    pub fn receive(&self, bytes: &[u8]) -> NodeResult<Root> {
        self.ensure_open()?;
        let root = Root::decode(bytes)?;
        if !self.roots().has_feed(&root.feed) {
            return Err(NodeError::FeedNotFound(root.feed));
        }
        self.roots().ingest(&root)?;
        debug!(feed = %root.feed, seq = root.seq, "root received");
        if let Err(e) = self.hub.publish(&root) {
            warn!(feed = %root.feed, seq = root.seq, error = %e, "received root not forwarded");
        }
        Ok(root)
    }

    /// Token cancelled when the node closes. Long-running loops select on it.
    pub fn quitting(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Stop the node. Subscribers see their streams end. Calling this more
    /// than once has no further effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.quit.cancel();
        self.hub.close();
        info!("node closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> NodeResult<()> {
        if self.is_closed() {
            return Err(NodeError::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_crypto::SigningKey;
    use fg_object::{Object, Refs};
    use fg_pack::PackFlags;
    use fg_root::RootError;
    use serde::{Deserialize, Serialize};
    use tokio::sync::broadcast::error::RecvError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Object for Note {
        const SCHEMA: &'static str = "test.Note";
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Notes {
        items: Refs<Note>,
    }

    impl Object for Notes {
        const SCHEMA: &'static str = "test.Notes";

        fn save_refs(&mut self, ctx: &fg_object::Context) -> fg_object::ObjectResult<()> {
            self.items.save(ctx)?;
            Ok(())
        }
    }

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .register::<Note>()
            .unwrap()
            .register::<Notes>()
            .unwrap()
            .build()
    }

    fn node() -> Node {
        Node::new(NodeConfig::default(), registry()).unwrap()
    }

    #[tokio::test]
    async fn saved_roots_reach_subscribers() {
        let node = node();
        let key = SigningKey::generate();
        assert!(node.add_feed(key.feed()).unwrap());
        let mut rx = node.subscribe(&key.feed()).unwrap();

        let mut pack = node
            .container()
            .new_pack(&key.feed(), &key, PackFlags::default())
            .unwrap();
        pack.append(Notes::default()).unwrap();
        let r0 = pack.save().unwrap();
        {
            let (notes, ctx) = pack.edit::<Notes>(0).unwrap();
            notes.items.append(ctx, Note { text: "hi".into() }).unwrap();
        }
        let r1 = pack.save().unwrap();

        assert_eq!(rx.recv().await.unwrap(), r0);
        assert_eq!(rx.recv().await.unwrap(), r1);
    }

    #[test]
    fn add_feed_twice() {
        let node = node();
        let feed = SigningKey::generate().feed();
        assert!(node.add_feed(feed).unwrap());
        assert!(!node.add_feed(feed).unwrap());
        assert_eq!(node.feeds(), vec![feed]);
    }

    #[tokio::test]
    async fn del_feed_ends_its_streams() {
        let node = node();
        let key = SigningKey::generate();
        node.add_feed(key.feed()).unwrap();
        let mut rx = node.subscribe(&key.feed()).unwrap();

        assert!(node.del_feed(&key.feed()).unwrap());
        assert!(!node.del_feed(&key.feed()).unwrap());
        assert!(node.feeds().is_empty());
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(node.subscribe(&key.feed()), Err(NodeError::FeedNotFound(_))));
        assert!(matches!(
            node.container().new_pack(&key.feed(), &key, PackFlags::default()),
            Err(fg_pack::PackError::Root(RootError::FeedNotFound(_)))
        ));
    }

    #[test]
    fn subscribe_unknown_feed() {
        let node = node();
        let feed = SigningKey::generate().feed();
        assert!(matches!(node.subscribe(&feed), Err(NodeError::FeedNotFound(_))));
    }

    #[tokio::test]
    async fn receive_records_and_forwards() {
        let writer = node();
        let reader = node();
        let key = SigningKey::generate();
        writer.add_feed(key.feed()).unwrap();
        reader.add_feed(key.feed()).unwrap();
        let mut rx = reader.subscribe(&key.feed()).unwrap();

        let mut pack = writer
            .container()
            .new_pack(&key.feed(), &key, PackFlags::default())
            .unwrap();
        pack.append(Notes::default()).unwrap();
        let r0 = pack.save().unwrap();
        let r1 = pack.save().unwrap();

        let got = reader.receive(&r0.encode().unwrap()).unwrap();
        assert_eq!(got, r0);
        reader.receive(&r1.encode().unwrap()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), r0);
        assert_eq!(rx.recv().await.unwrap(), r1);
        assert_eq!(reader.roots().last_root(&key.feed()).unwrap(), Some(r1.clone()));

        // Replays do not extend the chain.
        assert!(matches!(
            reader.receive(&r1.encode().unwrap()),
            Err(NodeError::Root(RootError::ChainViolation { .. }))
        ));
    }

    #[test]
    fn receive_rejects_unknown_feed_and_garbage() {
        let writer = node();
        let reader = node();
        let key = SigningKey::generate();
        writer.add_feed(key.feed()).unwrap();

        let mut pack = writer
            .container()
            .new_pack(&key.feed(), &key, PackFlags::default())
            .unwrap();
        pack.append(Notes::default()).unwrap();
        let r0 = pack.save().unwrap();

        assert!(matches!(
            reader.receive(&r0.encode().unwrap()),
            Err(NodeError::FeedNotFound(_))
        ));
        assert!(matches!(
            reader.receive(b"not a root"),
            Err(NodeError::Root(RootError::Encoding(_)))
        ));
    }

    #[tokio::test]
    async fn close_cancels_and_ends_streams() {
        let node = node();
        let key = SigningKey::generate();
        node.add_feed(key.feed()).unwrap();
        let mut rx = node.subscribe(&key.feed()).unwrap();
        let quit = node.quitting();

        node.close();
        node.close();
        assert!(node.is_closed());
        assert!(quit.is_cancelled());
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(node.add_feed(key.feed()), Err(NodeError::Closed)));
    }

    #[test]
    fn filesystem_store_persists_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            in_memory: false,
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        };
        let node = Node::new(config, registry()).unwrap();
        let key = SigningKey::generate();
        node.add_feed(key.feed()).unwrap();
        let mut pack = node
            .container()
            .new_pack(&key.feed(), &key, PackFlags::default())
            .unwrap();
        pack.append(Notes::default()).unwrap();
        let root = pack.save().unwrap();

        assert!(dir.path().join("blobs").is_dir());
        assert!(node.container().store().has(&root.hash()).unwrap());
    }
}
