use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fg_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// In-memory blob store.
///
/// Blobs live in a `HashMap` behind a `RwLock` and are lost on drop. The
/// store can be switched to read-only at runtime, which makes every write
/// fail with [`StoreError::ReadOnly`]. Tests use this to make a save fail
/// part way through.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<ObjectId, Vec<u8>>>,
    read_only: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.read_guard().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all blobs.
    pub fn total_bytes(&self) -> u64 {
        self.read_guard()
            .map(|m| m.values().map(|b| b.len() as u64).sum())
            .unwrap_or(0)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Sorted list of all keys.
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .read_guard()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn read_guard(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<ObjectId, Vec<u8>>>> {
        self.blobs
            .read()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }

    fn write_guard(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<ObjectId, Vec<u8>>>> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        self.blobs
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn get(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.read_guard()?.get(id).cloned())
    }

    fn put(&self, id: ObjectId, data: Vec<u8>) -> StoreResult<()> {
        if id.is_null() {
            return Err(StoreError::NullKey);
        }
        self.write_guard()?.entry(id).or_insert(data);
        Ok(())
    }

    fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.read_guard()?.contains_key(id))
    }

    fn put_batch(&self, blobs: Vec<(ObjectId, Vec<u8>)>) -> StoreResult<()> {
        if blobs.iter().any(|(id, _)| id.is_null()) {
            return Err(StoreError::NullKey);
        }
        // One lock acquisition: the whole batch becomes visible at once.
        let mut map = self.write_guard()?;
        for (id, data) in blobs {
            map.entry(id).or_insert(data);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ObjectId {
        ObjectId::digest(s.as_bytes())
    }

    #[test]
    fn put_get_has() {
        let store = InMemoryBlobStore::new();
        store.put(id("a"), b"alpha".to_vec()).unwrap();
        assert_eq!(store.get(&id("a")).unwrap(), Some(b"alpha".to_vec()));
        assert!(store.has(&id("a")).unwrap());
        assert!(!store.has(&id("b")).unwrap());
        assert!(store.get(&id("b")).unwrap().is_none());
    }

    #[test]
    fn require_reports_missing_key() {
        let store = InMemoryBlobStore::new();
        let err = store.require(&id("missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(k) if k == id("missing")));
    }

    #[test]
    fn existing_bytes_are_never_replaced() {
        let store = InMemoryBlobStore::new();
        store.put(id("k"), b"first".to_vec()).unwrap();
        store.put(id("k"), b"second".to_vec()).unwrap();
        assert_eq!(store.get(&id("k")).unwrap(), Some(b"first".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn null_key_rejected() {
        let store = InMemoryBlobStore::new();
        assert!(matches!(
            store.put(ObjectId::null(), vec![1]),
            Err(StoreError::NullKey)
        ));
        assert!(matches!(
            store.put_batch(vec![(id("ok"), vec![1]), (ObjectId::null(), vec![2])]),
            Err(StoreError::NullKey)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn read_only_blocks_writes_but_not_reads() {
        let store = InMemoryBlobStore::new();
        store.put(id("a"), vec![1]).unwrap();
        store.set_read_only(true);
        assert!(matches!(store.put(id("b"), vec![2]), Err(StoreError::ReadOnly)));
        assert!(matches!(
            store.put_batch(vec![(id("c"), vec![3])]),
            Err(StoreError::ReadOnly)
        ));
        assert!(store.has(&id("a")).unwrap());
        store.set_read_only(false);
        store.put(id("b"), vec![2]).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn batch_and_accounting() {
        let store = InMemoryBlobStore::new();
        store
            .put_batch(vec![(id("x"), vec![0; 5]), (id("y"), vec![0; 9])])
            .unwrap();
        assert_eq!(store.total_bytes(), 14);
        let ids = store.all_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] <= ids[1]);
    }

    #[test]
    fn concurrent_reads_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryBlobStore::new());
        store.put(id("shared"), b"shared".to_vec()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    assert_eq!(store.get(&id("shared")).unwrap().unwrap(), b"shared");
                })
            })
            .collect();
        for h in handles {
            h.join().expect("reader thread panicked");
        }
    }

    #[test]
    fn debug_format() {
        let debug = format!("{:?}", InMemoryBlobStore::new());
        assert!(debug.contains("blob_count"));
    }
}
