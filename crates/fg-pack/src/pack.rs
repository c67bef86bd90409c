use std::fmt;
use std::sync::Arc;

use fg_crypto::{ContentHasher, SigningKey};
use fg_object::{AnyObject, Context, ContextFlags, Object, ObjectError, Registry};
use fg_root::{Dynamic, Root, RootManager};
use fg_store::BlobStore;
use fg_types::{FeedId, ObjectId};
use tracing::{debug, info, warn};

use crate::container::Lease;
use crate::error::{PackError, PackResult};
use crate::publish::Publisher;

/// Options for a pack session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackFlags {
    /// Collections keep a hash → index table for lookups by hash.
    pub hash_table_index: bool,
    /// The pack may be read and edited in memory but never saved. View-only
    /// packs take no feed lease.
    pub view_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackState {
    /// Opened, nothing changed yet.
    Open,
    /// Holds unsaved changes.
    Mutating,
    /// Everything is saved.
    Saved,
    Closed,
}

/// Handles a container passes to the packs it opens.
pub(crate) struct Shared {
    pub store: Arc<dyn BlobStore>,
    pub registry: Arc<Registry>,
    pub roots: Arc<RootManager>,
    pub publisher: Option<Arc<dyn Publisher>>,
}

/// One top-level object of the pack.
struct Slot {
    schema: &'static str,
    /// Hash as of the base root. Null for objects appended in this session.
    hash: ObjectId,
    value: Option<Box<dyn AnyObject>>,
}

/// Mutable session over one feed.
///
/// Top-level objects are decoded lazily the first time they are accessed.
/// [`save`](Pack::save) is all or nothing: if any step fails the pack still
/// sits on its previous root with its slots unchanged, and may be saved
/// again.
pub struct Pack {
    feed: FeedId,
    key: SigningKey,
    ctx: Context,
    roots: Arc<RootManager>,
    publisher: Option<Arc<dyn Publisher>>,
    flags: PackFlags,
    base: Option<Root>,
    slots: Vec<Slot>,
    state: PackState,
    lease: Option<Lease>,
}

impl Pack {
    pub(crate) fn open(
        feed: FeedId,
        key: SigningKey,
        shared: Shared,
        base: Option<Root>,
        flags: PackFlags,
        lease: Option<Lease>,
    ) -> PackResult<Self> {
        let slots = match &base {
            Some(root) => root
                .refs
                .iter()
                .map(|entry| -> PackResult<Slot> {
                    Ok(Slot {
                        schema: shared.registry.resolve(&entry.schema)?.name(),
                        hash: entry.object,
                        value: None,
                    })
                })
                .collect::<PackResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        let ctx = Context::new(shared.store, shared.registry).with_flags(ContextFlags {
            hash_table_index: flags.hash_table_index,
        });
        Ok(Self {
            feed,
            key,
            ctx,
            roots: shared.roots,
            publisher: shared.publisher,
            flags,
            base,
            slots,
            state: PackState::Open,
            lease,
        })
    }

    pub fn feed(&self) -> FeedId {
        self.feed
    }

    pub fn state(&self) -> PackState {
        self.state
    }

    pub fn flags(&self) -> PackFlags {
        self.flags
    }

    /// The root this pack currently builds on.
    pub fn root(&self) -> Option<&Root> {
        self.base.as_ref()
    }

    /// Context for operating on collections inside this pack's objects.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn schema_at(&self, index: usize) -> PackResult<&'static str> {
        self.slot(index).map(|s| s.schema)
    }

    /// Add a top-level object. Returns its index.
    pub fn append<T: Object>(&mut self, value: T) -> PackResult<usize> {
        self.ensure_open()?;
        self.ctx.registry().check::<T>()?;
        self.slots.push(Slot {
            schema: T::SCHEMA,
            hash: ObjectId::null(),
            value: Some(Box::new(value)),
        });
        self.state = PackState::Mutating;
        Ok(self.slots.len() - 1)
    }

    pub fn get<T: Object>(&mut self, index: usize) -> PackResult<&T> {
        self.ensure_open()?;
        let slot = load(&mut self.slots, &self.ctx, index)?;
        let schema = slot.schema;
        slot.value
            .as_ref()
            .and_then(|v| v.as_any().downcast_ref::<T>())
            .ok_or(PackError::SchemaMismatch {
                index,
                expected: T::SCHEMA,
                actual: schema,
            })
    }

    /// Mutable access to a top-level object. The slot counts as changed.
    pub fn get_mut<T: Object>(&mut self, index: usize) -> PackResult<&mut T> {
        self.edit::<T>(index).map(|(value, _)| value)
    }

    /// Like [`get_mut`](Pack::get_mut), also handing out the context needed
    /// to change collections inside the object.
    pub fn edit<T: Object>(&mut self, index: usize) -> PackResult<(&mut T, &Context)> {
        self.access::<T>(index, true)
    }

    /// Read an object together with the context its nested collections need
    /// for lookups. The slot is not marked as changed and the pack state is
    /// left alone. Anything altered through it is still found by
    /// [`save`](Pack::save), which compares hashes.
    pub fn view<T: Object>(&mut self, index: usize) -> PackResult<(&mut T, &Context)> {
        self.access::<T>(index, false)
    }

    fn access<T: Object>(&mut self, index: usize, mutate: bool) -> PackResult<(&mut T, &Context)> {
        self.ensure_open()?;
        let slot = load(&mut self.slots, &self.ctx, index)?;
        let schema = slot.schema;
        let mismatch = PackError::SchemaMismatch {
            index,
            expected: T::SCHEMA,
            actual: schema,
        };
        if slot.value.as_ref().map_or(true, |v| !v.as_any().is::<T>()) {
            return Err(mismatch);
        }
        if mutate {
            self.state = PackState::Mutating;
        }
        let value = slot
            .value
            .as_mut()
            .and_then(|v| v.as_any_mut().downcast_mut::<T>())
            .ok_or(mismatch)?;
        Ok((value, &self.ctx))
    }

    /// Replace the object at `index`, which may change its schema.
    pub fn set<T: Object>(&mut self, index: usize, value: T) -> PackResult<()> {
        self.ensure_open()?;
        self.ctx.registry().check::<T>()?;
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PackError::IndexOutOfRange { index, len })?;
        slot.schema = T::SCHEMA;
        slot.value = Some(Box::new(value));
        self.state = PackState::Mutating;
        Ok(())
    }

    /// Persist changed objects and record the next root of the feed.
    ///
    /// Nested collections of loaded objects are saved first, then every
    /// object whose hash differs from the one in the base root, then the
    /// signed root is appended to the root manager. Only after that does the
    /// pack move onto the new root. Publication comes last and its failure is
    /// logged, not returned.
    pub fn save(&mut self) -> PackResult<Root> {
        self.ensure_open()?;
        if self.flags.view_only {
            return Err(PackError::ViewOnly);
        }

        // Nested collections are saved in place. This persists their nodes
        // and leaves their contents as they were.
        for slot in &mut self.slots {
            if let Some(value) = slot.value.as_mut() {
                value.save_refs(&self.ctx)?;
            }
        }

        let mut writes = Vec::new();
        let mut hashes = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            match &slot.value {
                Some(value) => {
                    let (hash, bytes) = value.encode()?;
                    if hash != slot.hash {
                        writes.push((hash, bytes));
                    }
                    hashes.push(hash);
                }
                None => hashes.push(slot.hash),
            }
        }

        let (seq, prev) = match &self.base {
            Some(base) => (base.seq + 1, base.hash()),
            None => (0, ObjectId::null()),
        };
        let refs = self
            .slots
            .iter()
            .zip(&hashes)
            .map(|(slot, hash)| Dynamic::new(slot.schema, *hash))
            .collect();
        let mut root = Root::unsigned(self.feed, seq, prev, self.ctx.registry().digest(), refs);
        root.sign(&self.key)?;

        let objects = writes.len();
        if !writes.is_empty() {
            self.ctx.store().put_batch(writes)?;
        }
        let root_hash = self.roots.append(&root)?;

        for (slot, hash) in self.slots.iter_mut().zip(hashes) {
            slot.hash = hash;
        }
        self.base = Some(root.clone());
        self.state = PackState::Saved;
        info!(feed = %self.feed, seq, root = %root_hash.short_hex(), objects, "pack saved");

        if let Some(publisher) = &self.publisher {
            match publisher.publish(&root) {
                Ok(reached) => debug!(feed = %self.feed, seq, reached, "root published"),
                Err(e) => warn!(feed = %self.feed, seq, error = %e, "root publication failed"),
            }
        }
        Ok(root)
    }

    /// End the session and release the feed. Closing twice is harmless.
    pub fn close(&mut self) {
        if self.state == PackState::Closed {
            return;
        }
        if self.state == PackState::Mutating {
            warn!(feed = %self.feed, "closing pack with unsaved changes");
        }
        self.state = PackState::Closed;
        self.slots.clear();
        self.lease = None;
        debug!(feed = %self.feed, "pack closed");
    }

    fn ensure_open(&self) -> PackResult<()> {
        if self.state == PackState::Closed {
            return Err(PackError::Closed);
        }
        Ok(())
    }

    fn slot(&self, index: usize) -> PackResult<&Slot> {
        self.ensure_open()?;
        self.slots.get(index).ok_or(PackError::IndexOutOfRange {
            index,
            len: self.slots.len(),
        })
    }
}

/// The slot at `index` with its value decoded.
fn load<'a>(slots: &'a mut [Slot], ctx: &Context, index: usize) -> PackResult<&'a mut Slot> {
    let len = slots.len();
    let slot = slots
        .get_mut(index)
        .ok_or(PackError::IndexOutOfRange { index, len })?;
    if slot.value.is_none() {
        let bytes = ctx.store().require(&slot.hash)?;
        if !ContentHasher::OBJECT.verify(&bytes, &slot.hash) {
            return Err(ObjectError::HashMismatch(slot.hash).into());
        }
        slot.value = Some(ctx.registry().decode(slot.schema, &bytes)?);
    }
    Ok(slot)
}

impl fmt::Debug for Pack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pack")
            .field("feed", &self.feed)
            .field("seq", &self.base.as_ref().map(|r| r.seq))
            .field("state", &self.state)
            .field("slots", &self.slots.len())
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
