use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};

use fg_crypto::{ContentHasher, SigningKey};
use fg_object::{ObjectError, Registry};
use fg_root::{Root, RootError, RootManager};
use fg_store::BlobStore;
use fg_types::FeedId;
use tracing::debug;

use crate::error::{PackError, PackResult};
use crate::pack::{Pack, PackFlags, Shared};
use crate::publish::Publisher;

type LeaseTable = Arc<Mutex<HashSet<FeedId>>>;

/// Exclusive write access to a feed, released on drop.
pub(crate) struct Lease {
    feed: FeedId,
    table: LeaseTable,
}

impl Lease {
    fn acquire(table: &LeaseTable, feed: FeedId) -> PackResult<Self> {
        let mut held = table.lock().map_err(|_| PackError::LockPoisoned)?;
        if !held.insert(feed) {
            return Err(PackError::FeedBusy(feed));
        }
        Ok(Self {
            feed,
            table: Arc::clone(table),
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.table.lock() {
            held.remove(&self.feed);
        }
    }
}

/// Opens packs over the feeds of a root manager.
pub struct Container {
    store: Arc<dyn BlobStore>,
    registry: Arc<Registry>,
    roots: Arc<RootManager>,
    publisher: Option<Arc<dyn Publisher>>,
    leases: LeaseTable,
}

impl Container {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<Registry>, roots: Arc<RootManager>) -> Self {
        Self {
            store,
            registry,
            roots,
            publisher: None,
            leases: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn roots(&self) -> &Arc<RootManager> {
        &self.roots
    }

    /// Open a pack on the feed's latest root, or an empty one if the feed
    /// has no roots yet.
    pub fn new_pack(&self, feed: &FeedId, key: &SigningKey, flags: PackFlags) -> PackResult<Pack> {
        if !self.roots.has_feed(feed) {
            return Err(RootError::FeedNotFound(*feed).into());
        }
        let lease = self.lease(feed, flags)?;
        let base = self.roots.last_root(feed)?;
        if let Some(root) = &base {
            self.check_root(root)?;
        }
        debug!(feed = %feed, seq = ?base.as_ref().map(|r| r.seq), "pack opened");
        Pack::open(
            *feed,
            key.clone(),
            self.shared(),
            base,
            flags,
            lease,
        )
    }

    /// Open a pack on a specific root of a feed.
    ///
    /// Saving such a pack only succeeds if `root` is still the feed's head.
    pub fn pack_from_root(&self, root: Root, key: &SigningKey, flags: PackFlags) -> PackResult<Pack> {
        root.verify()?;
        if !self.roots.has_feed(&root.feed) {
            return Err(RootError::FeedNotFound(root.feed).into());
        }
        self.check_root(&root)?;
        let lease = self.lease(&root.feed, flags)?;
        debug!(feed = %root.feed, seq = root.seq, "pack opened on given root");
        Pack::open(
            root.feed,
            key.clone(),
            self.shared(),
            Some(root),
            flags,
            lease,
        )
    }

    /// Human-readable rendering of a root and its decoded top-level objects.
    pub fn inspect(&self, root: &Root) -> PackResult<String> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} seq={} root={} prev={} time={}",
            root.feed,
            root.seq,
            root.hash().short_hex(),
            root.prev.short_hex(),
            root.timestamp
        );
        for (index, entry) in root.refs.iter().enumerate() {
            let bytes = self.store.require(&entry.object)?;
            if !ContentHasher::OBJECT.verify(&bytes, &entry.object) {
                return Err(ObjectError::HashMismatch(entry.object).into());
            }
            let value = self.registry.decode(&entry.schema, &bytes)?;
            let _ = writeln!(
                out,
                "  [{index}] {} {} {:?}",
                entry.schema,
                entry.object.short_hex(),
                value
            );
        }
        Ok(out)
    }

    fn lease(&self, feed: &FeedId, flags: PackFlags) -> PackResult<Option<Lease>> {
        if flags.view_only {
            return Ok(None);
        }
        Lease::acquire(&self.leases, *feed).map(Some)
    }

    /// A root is usable only if every schema it names is registered here
    /// and it was written against the same schema set.
    fn check_root(&self, root: &Root) -> PackResult<()> {
        if let Some(missing) = root.refs.iter().find(|e| !self.registry.contains(&e.schema)) {
            return Err(PackError::RegistryMismatch(format!(
                "schema {} of root seq {} is not registered",
                missing.schema, root.seq
            )));
        }
        if root.registry != self.registry.digest() {
            return Err(PackError::RegistryMismatch(format!(
                "root seq {} was written with registry {}, local registry is {}",
                root.seq,
                root.registry.short_hex(),
                self.registry.digest().short_hex()
            )));
        }
        Ok(())
    }

    fn shared(&self) -> Shared {
        Shared {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            roots: Arc::clone(&self.roots),
            publisher: self.publisher.clone(),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registry", &self.registry)
            .field("roots", &self.roots)
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}
