use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fg_crypto::RootChainVerifier;
use fg_store::BlobStore;
use fg_types::{FeedId, ObjectId};
use tracing::{debug, info};

use crate::error::{RootError, RootResult};
use crate::root::Root;

/// Known roots of one feed.
#[derive(Default)]
struct FeedChain {
    /// Root hashes in sequence order, the first one at `first_seq`.
    hashes: Vec<ObjectId>,
    first_seq: u64,
    head: Option<Root>,
}

type SharedChain = Arc<Mutex<FeedChain>>;

/// Tracks the chain of roots of every registered feed.
///
/// Root bytes go to the blob store under the root hash; the manager keeps
/// the per-feed sequence → hash index and the current head. A root is only
/// accepted if its signature verifies and it extends the head by exactly
/// one step, which rules out forks, gaps, and replays.
///
/// Each feed has its own lock. The feed table lock is only held to look a
/// feed up, so a slow store write on one feed never stalls another.
pub struct RootManager {
    store: Arc<dyn BlobStore>,
    feeds: RwLock<HashMap<FeedId, SharedChain>>,
}

impl RootManager {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Register a feed. Returns `false` if it was already known.
    pub fn add_feed(&self, feed: FeedId) -> RootResult<bool> {
        let mut feeds = self.write()?;
        if feeds.contains_key(&feed) {
            return Ok(false);
        }
        feeds.insert(feed, SharedChain::default());
        info!(feed = %feed, "feed registered");
        Ok(true)
    }

    pub fn has_feed(&self, feed: &FeedId) -> bool {
        self.read().map(|f| f.contains_key(feed)).unwrap_or(false)
    }

    /// Registered feeds in byte order.
    pub fn feeds(&self) -> Vec<FeedId> {
        let mut feeds: Vec<FeedId> = self
            .read()
            .map(|f| f.keys().copied().collect())
            .unwrap_or_default();
        feeds.sort();
        feeds
    }

    /// Forget a feed. Its roots stay in the store.
    pub fn del_feed(&self, feed: &FeedId) -> RootResult<bool> {
        let removed = self.write()?.remove(feed).is_some();
        if removed {
            info!(feed = %feed, "feed removed");
        }
        Ok(removed)
    }

    /// Record a root produced locally. The first root of a feed must be its
    /// genesis (seq 0, null prev).
    pub fn append(&self, root: &Root) -> RootResult<ObjectId> {
        self.record(root, false)
    }

    /// Record a root received from a peer. The first root seen for a feed
    /// is taken as the starting point wherever it sits in the chain.
    pub fn ingest(&self, root: &Root) -> RootResult<ObjectId> {
        self.record(root, true)
    }

    pub fn last_root(&self, feed: &FeedId) -> RootResult<Option<Root>> {
        let chain = self.chain_of(feed)?;
        let head = lock(&chain)?.head.clone();
        Ok(head)
    }

    pub fn root_by_seq(&self, feed: &FeedId, seq: u64) -> RootResult<Root> {
        let shared = self.chain_of(feed)?;
        let found = {
            let chain = lock(&shared)?;
            let found = seq
                .checked_sub(chain.first_seq)
                .and_then(|offset| chain.hashes.get(offset as usize))
                .copied();
            found
        };
        let hash = found.ok_or(RootError::RootNotFound { feed: *feed, seq })?;
        Root::decode(&self.store.require(&hash)?)
    }

    /// All known roots of a feed, oldest first.
    pub fn chain(&self, feed: &FeedId) -> RootResult<Vec<Root>> {
        let shared = self.chain_of(feed)?;
        let hashes = lock(&shared)?.hashes.clone();
        hashes
            .iter()
            .map(|hash| Root::decode(&self.store.require(hash)?))
            .collect()
    }

    /// Re-read a feed's roots from the store and check signatures and links.
    pub fn verify_feed(&self, feed: &FeedId) -> RootResult<()> {
        let roots = self.chain(feed)?;
        for root in &roots {
            root.verify()?;
        }
        match roots.first() {
            Some(first) if first.seq == 0 => RootChainVerifier::verify_from_genesis(&roots)?,
            _ => RootChainVerifier::verify_chain(&roots)?,
        }
        Ok(())
    }

    fn record(&self, root: &Root, foreign: bool) -> RootResult<ObjectId> {
        root.verify()?;
        let hash = root.hash();

        let shared = self.chain_of(&root.feed)?;
        let mut chain = lock(&shared)?;

        let violation = |reason: String| RootError::ChainViolation {
            feed: root.feed,
            seq: root.seq,
            reason,
        };
        match &chain.head {
            None if foreign => {}
            None => {
                if !root.is_genesis() {
                    return Err(violation("first root must have seq 0 and a null prev".into()));
                }
            }
            Some(head) => {
                if head.seq.checked_add(1) != Some(root.seq) {
                    return Err(violation(format!("head is at seq {}", head.seq)));
                }
                if root.prev != head.hash() {
                    return Err(violation("prev does not match the head root".into()));
                }
            }
        }

        self.store.put(hash, root.encode()?)?;
        if chain.head.is_none() {
            chain.first_seq = root.seq;
        }
        chain.hashes.push(hash);
        chain.head = Some(root.clone());
        debug!(feed = %root.feed, seq = root.seq, root = %hash.short_hex(), foreign, "root recorded");
        Ok(hash)
    }

    /// The chain of a feed, with the feed table lock already released.
    fn chain_of(&self, feed: &FeedId) -> RootResult<SharedChain> {
        self.read()?
            .get(feed)
            .cloned()
            .ok_or(RootError::FeedNotFound(*feed))
    }

    fn read(&self) -> RootResult<RwLockReadGuard<'_, HashMap<FeedId, SharedChain>>> {
        self.feeds.read().map_err(|_| RootError::LockPoisoned)
    }

    fn write(&self) -> RootResult<RwLockWriteGuard<'_, HashMap<FeedId, SharedChain>>> {
        self.feeds.write().map_err(|_| RootError::LockPoisoned)
    }
}

fn lock(chain: &SharedChain) -> RootResult<MutexGuard<'_, FeedChain>> {
    chain.lock().map_err(|_| RootError::LockPoisoned)
}

impl fmt::Debug for RootManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootManager")
            .field("feeds", &self.feeds().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::Dynamic;
    use fg_crypto::{SignatureError, SigningKey};
    use fg_store::InMemoryBlobStore;

    fn manager() -> (Arc<InMemoryBlobStore>, RootManager) {
        let store = Arc::new(InMemoryBlobStore::new());
        let roots = RootManager::new(store.clone());
        (store, roots)
    }

    fn next(key: &SigningKey, prev: Option<&Root>) -> Root {
        let (seq, prev) = prev
            .map(|r| (r.seq + 1, r.hash()))
            .unwrap_or((0, ObjectId::null()));
        Root::unsigned(key.feed(), seq, prev, ObjectId::null(), vec![])
            .signed(key)
            .unwrap()
    }

    fn at(key: &SigningKey, seq: u64, prev: ObjectId) -> Root {
        Root::unsigned(key.feed(), seq, prev, ObjectId::null(), vec![])
            .signed(key)
            .unwrap()
    }

    // -- feed registry ------------------------------------------------------

    #[test]
    fn feed_registration() {
        let (_, roots) = manager();
        let a = SigningKey::generate().feed();
        let b = SigningKey::generate().feed();

        assert!(roots.add_feed(a).unwrap());
        assert!(!roots.add_feed(a).unwrap());
        roots.add_feed(b).unwrap();
        assert!(roots.has_feed(&a));

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(roots.feeds(), expected);

        assert!(roots.del_feed(&a).unwrap());
        assert!(!roots.del_feed(&a).unwrap());
        assert!(!roots.has_feed(&a));
        assert!(matches!(roots.last_root(&a), Err(RootError::FeedNotFound(f)) if f == a));
    }

    #[test]
    fn unknown_feed_rejected() {
        let (_, roots) = manager();
        let key = SigningKey::generate();
        assert!(matches!(
            roots.append(&next(&key, None)),
            Err(RootError::FeedNotFound(_))
        ));
    }

    // -- local chain ----------------------------------------------------------

    #[test]
    fn append_builds_chain() {
        let (store, roots) = manager();
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();
        assert!(roots.last_root(&key.feed()).unwrap().is_none());

        let r0 = next(&key, None);
        let r1 = next(&key, Some(&r0));
        let r2 = next(&key, Some(&r1));
        for r in [&r0, &r1, &r2] {
            let hash = roots.append(r).unwrap();
            assert_eq!(hash, r.hash());
            assert!(store.has(&hash).unwrap());
        }

        assert_eq!(roots.last_root(&key.feed()).unwrap(), Some(r2.clone()));
        assert_eq!(roots.root_by_seq(&key.feed(), 1).unwrap(), r1);
        assert!(matches!(
            roots.root_by_seq(&key.feed(), 3),
            Err(RootError::RootNotFound { seq: 3, .. })
        ));
        assert_eq!(roots.chain(&key.feed()).unwrap().len(), 3);
        roots.verify_feed(&key.feed()).unwrap();
    }

    #[test]
    fn first_local_root_must_be_genesis() {
        let (_, roots) = manager();
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();
        let err = roots.append(&at(&key, 3, ObjectId::digest(b"x"))).unwrap_err();
        assert!(matches!(err, RootError::ChainViolation { seq: 3, .. }));
    }

    #[test]
    fn gaps_forks_and_replays_rejected() {
        let (_, roots) = manager();
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();
        let r0 = next(&key, None);
        let r1 = next(&key, Some(&r0));
        roots.append(&r0).unwrap();
        roots.append(&r1).unwrap();

        let gap = at(&key, 3, r1.hash());
        let fork = at(&key, 2, r0.hash());
        for bad in [&gap, &fork, &r1, &r0] {
            assert!(matches!(
                roots.append(bad),
                Err(RootError::ChainViolation { .. })
            ));
        }
        assert_eq!(roots.last_root(&key.feed()).unwrap(), Some(r1));
    }

    #[test]
    fn bad_signature_rejected() {
        let (store, roots) = manager();
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();

        let mut forged = next(&key, None);
        forged.refs.push(Dynamic::new("test.List", ObjectId::digest(b"evil")));
        assert!(matches!(
            roots.append(&forged),
            Err(RootError::Signature(SignatureError::InvalidSignature))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn store_failure_leaves_head_unchanged() {
        let (store, roots) = manager();
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();
        let r0 = next(&key, None);
        roots.append(&r0).unwrap();

        store.set_read_only(true);
        assert!(matches!(
            roots.append(&next(&key, Some(&r0))),
            Err(RootError::Store(_))
        ));
        assert_eq!(roots.last_root(&key.feed()).unwrap(), Some(r0));
    }

    // -- foreign roots --------------------------------------------------------

    #[test]
    fn ingest_starts_anywhere() {
        let (_, roots) = manager();
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();

        let r5 = at(&key, 5, ObjectId::digest(b"older"));
        let r6 = next(&key, Some(&r5));
        roots.ingest(&r5).unwrap();
        roots.ingest(&r6).unwrap();

        assert_eq!(roots.root_by_seq(&key.feed(), 5).unwrap(), r5);
        assert_eq!(roots.root_by_seq(&key.feed(), 6).unwrap(), r6);
        assert!(matches!(
            roots.root_by_seq(&key.feed(), 4),
            Err(RootError::RootNotFound { seq: 4, .. })
        ));
        roots.verify_feed(&key.feed()).unwrap();

        assert!(matches!(roots.ingest(&r6), Err(RootError::ChainViolation { .. })));
    }

    // -- concurrency ----------------------------------------------------------

    #[test]
    fn racing_writers_cannot_fork() {
        use std::thread;

        let (_, roots) = manager();
        let roots = Arc::new(roots);
        let key = SigningKey::generate();
        roots.add_feed(key.feed()).unwrap();
        let r0 = next(&key, None);
        roots.append(&r0).unwrap();

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let roots = Arc::clone(&roots);
                let candidate = Root::unsigned(
                    key.feed(),
                    1,
                    r0.hash(),
                    ObjectId::digest(&[i]),
                    vec![],
                )
                .signed(&key)
                .unwrap();
                thread::spawn(move || roots.append(&candidate).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().expect("writer thread panicked"))
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(roots.chain(&key.feed()).unwrap().len(), 2);
    }

    /// Signals when a write starts, then holds it for `delay`.
    struct SlowStore {
        inner: InMemoryBlobStore,
        started: Mutex<std::sync::mpsc::Sender<()>>,
        delay: std::time::Duration,
    }

    impl BlobStore for SlowStore {
        fn get(&self, id: &ObjectId) -> fg_store::StoreResult<Option<Vec<u8>>> {
            self.inner.get(id)
        }

        fn put(&self, id: ObjectId, data: Vec<u8>) -> fg_store::StoreResult<()> {
            if let Ok(tx) = self.started.lock() {
                let _ = tx.send(());
            }
            std::thread::sleep(self.delay);
            self.inner.put(id, data)
        }

        fn has(&self, id: &ObjectId) -> fg_store::StoreResult<bool> {
            self.inner.has(id)
        }
    }

    #[test]
    fn slow_write_on_one_feed_does_not_stall_another() {
        use std::time::{Duration, Instant};

        let (tx, rx) = std::sync::mpsc::channel();
        let store = Arc::new(SlowStore {
            inner: InMemoryBlobStore::new(),
            started: Mutex::new(tx),
            delay: Duration::from_millis(1500),
        });
        let roots = Arc::new(RootManager::new(store));
        let busy = SigningKey::generate();
        let idle = SigningKey::generate();
        roots.add_feed(busy.feed()).unwrap();
        roots.add_feed(idle.feed()).unwrap();

        let writer = {
            let roots = Arc::clone(&roots);
            let genesis = next(&busy, None);
            std::thread::spawn(move || roots.append(&genesis).map(|_| ()))
        };
        rx.recv().unwrap();

        let started = Instant::now();
        assert!(roots.last_root(&idle.feed()).unwrap().is_none());
        assert!(roots.has_feed(&idle.feed()));
        let third = SigningKey::generate().feed();
        assert!(roots.add_feed(third).unwrap());
        let waited = started.elapsed();
        assert!(waited < Duration::from_millis(500), "waited {waited:?}");

        writer.join().expect("writer thread panicked").unwrap();
        assert_eq!(roots.last_root(&busy.feed()).unwrap().unwrap().seq, 0);
    }
}
