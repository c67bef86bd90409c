use fg_types::ObjectId;

use crate::error::{StoreError, StoreResult};

/// Opaque content-addressed blob store.
///
/// The caller computes the key; the store trusts it. Implementations must
/// satisfy:
/// - `put` never replaces bytes already stored under a key.
/// - a blob becomes visible to `get`/`has` only once fully written.
/// - `Send + Sync`, so one store can back many feeds and readers.
pub trait BlobStore: Send + Sync {
    /// Returns `Ok(None)` if the blob is absent.
    fn get(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>>;

    /// Store `data` under `id`. Idempotent.
    fn put(&self, id: ObjectId, data: Vec<u8>) -> StoreResult<()>;

    fn has(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Like [`BlobStore::get`], but absence is an error.
    fn require(&self, id: &ObjectId) -> StoreResult<Vec<u8>> {
        self.get(id)?.ok_or(StoreError::NotFound(*id))
    }

    /// Store several blobs. Backends may override to batch I/O.
    ///
    /// On error some of the blobs may already be stored. That is harmless:
    /// they are immutable and unreferenced until a root points at them.
    fn put_batch(&self, blobs: Vec<(ObjectId, Vec<u8>)>) -> StoreResult<()> {
        for (id, data) in blobs {
            self.put(id, data)?;
        }
        Ok(())
    }
}

impl<S: BlobStore + ?Sized> BlobStore for std::sync::Arc<S> {
    fn get(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(id)
    }

    fn put(&self, id: ObjectId, data: Vec<u8>) -> StoreResult<()> {
        (**self).put(id, data)
    }

    fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        (**self).has(id)
    }

    fn put_batch(&self, blobs: Vec<(ObjectId, Vec<u8>)>) -> StoreResult<()> {
        (**self).put_batch(blobs)
    }
}
