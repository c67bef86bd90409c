//! Ordered, hash-addressable collection backed by a Merkle tree.
//!
//! A tree of depth `d` holds up to `degree^(d+1)` elements. Leaves (depth 0)
//! list element hashes; branches list child node hashes. Elements are only
//! ever appended or replaced in place, so the tree is always left-packed and
//! element `i` can be found by arithmetic on `i` alone.
//!
//! Nodes live in an arena owned by the [`Refs`] value. A mutation clears the
//! cached hash of every node on the path from the element to the root;
//! [`Refs::save`] rehashes exactly those nodes and writes them in one batch.
//! Subtrees off the path keep their hashes and are not rewritten.
//!
//! A collection decoded from a parent object starts with only its root hash.
//! Nodes are read from the store the first time an operation reaches them.

mod node;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use fg_crypto::ContentHasher;
use fg_types::ObjectId;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{ObjectError, ObjectResult};
use crate::object::{decode, encode, Object};
use node::{span, Body, Child, Node, Slot, StoredNode};

pub const DEFAULT_DEGREE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Empty,
    Unloaded(ObjectId),
    Loaded(usize),
}

/// Ordered collection of objects of schema `T`, addressable by position and
/// by current content hash.
///
/// A `Refs` embedded in an object serializes as its saved root hash, degree
/// and length. Serializing one with unsaved changes is an error; call
/// [`save`](Refs::save) first (objects do this in
/// [`Object::save_refs`]).
#[derive(Clone)]
pub struct Refs<T> {
    degree: u32,
    length: u64,
    depth: u32,
    root: Root,
    nodes: Vec<Node<T>>,
    saved_root: ObjectId,
    index: Option<HashMap<ObjectId, BTreeSet<usize>>>,
}

impl<T> Refs<T> {
    fn empty(degree: u32) -> Self {
        Self {
            degree,
            length: 0,
            depth: 0,
            root: Root::Empty,
            nodes: Vec::new(),
            saved_root: ObjectId::null(),
            index: None,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Root hash as of the last save or load. Null for an empty collection.
    pub fn root_hash(&self) -> ObjectId {
        self.saved_root
    }

    /// Whether there are changes [`save`](Refs::save) has not persisted.
    pub fn is_dirty(&self) -> bool {
        match self.root {
            Root::Empty => !self.saved_root.is_null(),
            Root::Unloaded(_) => false,
            Root::Loaded(root) => !self.nodes[root].persisted,
        }
    }

    /// Remove every element. Persisted nodes stay in the store.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = Root::Empty;
        self.length = 0;
        self.depth = 0;
        if let Some(table) = self.index.as_mut() {
            table.clear();
        }
    }

    fn alloc(&mut self, node: Node<T>) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn capacity(&self) -> u64 {
        span(self.degree, self.depth + 1)
    }

    fn check_index(&self, index: usize) -> ObjectResult<()> {
        if index >= self.len() {
            return Err(ObjectError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    fn corrupt(&self, node: usize, reason: impl ToString) -> ObjectError {
        ObjectError::CorruptNode {
            id: self.nodes.get(node).and_then(|n| n.hash).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }

    fn leaf_slots(&self, leaf: usize) -> ObjectResult<&Vec<Slot<T>>> {
        match &self.nodes[leaf].body {
            Body::Leaf(slots) => Ok(slots),
            Body::Branch(_) => Err(self.corrupt(leaf, "expected a leaf")),
        }
    }
}

impl<T: Object> Refs<T> {
    pub fn new() -> Self {
        Self::empty(DEFAULT_DEGREE)
    }

    pub fn with_degree(degree: u32) -> ObjectResult<Self> {
        if degree < 2 {
            return Err(ObjectError::InvalidDegree(degree));
        }
        Ok(Self::empty(degree))
    }

    /// Store `value` and add it at the end. Returns its index.
    pub fn append(&mut self, ctx: &Context, value: T) -> ObjectResult<usize> {
        let hash = store_value(ctx, &value)?;
        let index = self.push_slot(
            ctx,
            Slot {
                hash,
                value: Some(value),
            },
        )?;
        if let Some(table) = self.index.as_mut() {
            table.entry(hash).or_default().insert(index);
        }
        trace!(schema = T::SCHEMA, index, hash = %hash.short_hex(), "appended");
        Ok(index)
    }

    /// Value at `index`, read and decoded on first access.
    pub fn get(&mut self, ctx: &Context, index: usize) -> ObjectResult<&T> {
        let (leaf, pos) = self.locate(ctx, index)?;
        self.ensure_value(ctx, leaf, pos)?;
        let slot = &self.leaf_slots(leaf)?[pos];
        slot.value
            .as_ref()
            .ok_or_else(|| self.corrupt(leaf, format!("slot {pos} has no value")))
    }

    /// Current hash of the element at `index`.
    pub fn hash_at(&mut self, ctx: &Context, index: usize) -> ObjectResult<ObjectId> {
        let (leaf, pos) = self.locate(ctx, index)?;
        Ok(self.leaf_slots(leaf)?[pos].hash)
    }

    pub fn ref_by_index(&mut self, ctx: &Context, index: usize) -> ObjectResult<Ref<'_, T>> {
        let hash = self.hash_at(ctx, index)?;
        Ok(Ref {
            refs: self,
            index,
            hash,
        })
    }

    /// Handle to the first element whose current hash is `hash`.
    pub fn ref_by_hash(&mut self, ctx: &Context, hash: &ObjectId) -> ObjectResult<Ref<'_, T>> {
        let index = self
            .index_of_hash(ctx, hash)?
            .ok_or(ObjectError::NotFound(*hash))?;
        Ok(Ref {
            refs: self,
            index,
            hash: *hash,
        })
    }

    /// Position of the first element whose current hash is `hash`.
    ///
    /// Scans the collection unless the context asks for a hash table index,
    /// in which case the table is built on first use and kept in step with
    /// later appends and replacements.
    pub fn index_of_hash(&mut self, ctx: &Context, hash: &ObjectId) -> ObjectResult<Option<usize>> {
        if ctx.flags().hash_table_index {
            if self.index.is_none() {
                let table = self.build_index(ctx)?;
                self.index = Some(table);
            }
            return Ok(self
                .index
                .as_ref()
                .and_then(|table| table.get(hash))
                .and_then(|positions| positions.first().copied()));
        }
        Ok(self.hashes(ctx)?.iter().position(|h| h == hash))
    }

    /// Replace the element at `index`. Returns the new element hash.
    ///
    /// The old object stays in the store, but the collection no longer
    /// resolves its hash.
    pub fn set_value(&mut self, ctx: &Context, index: usize, value: T) -> ObjectResult<ObjectId> {
        let (path, pos) = self.path_to(ctx, index)?;
        let leaf = path[path.len() - 1];
        let hash = store_value(ctx, &value)?;

        self.leaf_slots(leaf)?;
        let mut old = hash;
        if let Body::Leaf(slots) = &mut self.nodes[leaf].body {
            let replaced = std::mem::replace(
                &mut slots[pos],
                Slot {
                    hash,
                    value: Some(value),
                },
            );
            old = replaced.hash;
        }
        if old == hash {
            return Ok(hash);
        }
        for &node in &path {
            self.nodes[node].invalidate();
        }
        if let Some(table) = self.index.as_mut() {
            if let Some(positions) = table.get_mut(&old) {
                positions.remove(&index);
                if positions.is_empty() {
                    table.remove(&old);
                }
            }
            table.entry(hash).or_default().insert(index);
        }
        trace!(schema = T::SCHEMA, index, old = %old.short_hex(), new = %hash.short_hex(), "replaced");
        Ok(hash)
    }

    /// Current element hashes in order.
    pub fn hashes(&mut self, ctx: &Context) -> ObjectResult<Vec<ObjectId>> {
        self.ensure_root(ctx)?;
        let mut out = Vec::with_capacity(self.len());
        if let Root::Loaded(root) = self.root {
            self.collect_hashes(ctx, root, &mut out)?;
        }
        Ok(out)
    }

    pub fn values(&mut self, ctx: &Context) -> ObjectResult<Vec<T>> {
        (0..self.len()).map(|i| self.get(ctx, i).cloned()).collect()
    }

    /// Hash every changed node bottom-up and persist them in one batch.
    ///
    /// Nodes are marked persisted only after the batch is written, so a
    /// failed save can simply be retried.
    pub fn save(&mut self, ctx: &Context) -> ObjectResult<ObjectId> {
        let root = match self.root {
            Root::Empty => {
                self.saved_root = ObjectId::null();
                return Ok(self.saved_root);
            }
            Root::Unloaded(hash) => return Ok(hash),
            Root::Loaded(root) => root,
        };

        let mut writes = Vec::new();
        let hash = self.seal(root, &mut writes)?;
        let written = writes.len();
        if written > 0 {
            ctx.store().put_batch(writes)?;
            debug!(
                schema = T::SCHEMA,
                root = %hash.short_hex(),
                len = self.length,
                nodes = written,
                "refs saved"
            );
        }
        for node in &mut self.nodes {
            if node.hash.is_some() {
                node.persisted = true;
            }
        }
        self.saved_root = hash;
        Ok(hash)
    }

    // -- tree walking -------------------------------------------------------

    fn ensure_root(&mut self, ctx: &Context) -> ObjectResult<()> {
        if let Root::Unloaded(hash) = self.root {
            let node = self.load_node(ctx, hash, None)?;
            if self.nodes[node].length != self.length {
                let reason = format!(
                    "root holds {} elements, collection records {}",
                    self.nodes[node].length, self.length
                );
                self.nodes.pop();
                return Err(ObjectError::CorruptNode { id: hash, reason });
            }
            self.depth = self.nodes[node].depth;
            self.root = Root::Loaded(node);
        }
        Ok(())
    }

    fn load_node(&mut self, ctx: &Context, hash: ObjectId, depth: Option<u32>) -> ObjectResult<usize> {
        let bytes = ctx.store().get(&hash)?.ok_or(ObjectError::NotFound(hash))?;
        if !ContentHasher::REFS.verify(&bytes, &hash) {
            return Err(ObjectError::HashMismatch(hash));
        }
        let stored: StoredNode =
            bincode::deserialize(&bytes).map_err(|e| ObjectError::CorruptNode {
                id: hash,
                reason: e.to_string(),
            })?;

        let corrupt = |reason: String| ObjectError::CorruptNode { id: hash, reason };
        if stored.degree != self.degree {
            return Err(corrupt(format!(
                "degree {} in a degree {} tree",
                stored.degree, self.degree
            )));
        }
        if depth.is_some_and(|d| d != stored.depth) {
            return Err(corrupt(format!("unexpected depth {}", stored.depth)));
        }
        if stored.children.is_empty() || stored.children.len() > self.degree as usize {
            return Err(corrupt(format!("{} children", stored.children.len())));
        }

        let body = if stored.depth == 0 {
            if stored.length != stored.children.len() as u64 {
                return Err(corrupt(format!(
                    "leaf length {} with {} children",
                    stored.length,
                    stored.children.len()
                )));
            }
            Body::Leaf(
                stored
                    .children
                    .into_iter()
                    .map(|hash| Slot { hash, value: None })
                    .collect(),
            )
        } else {
            Body::Branch(stored.children.into_iter().map(Child::Unloaded).collect())
        };
        trace!(node = %hash.short_hex(), depth = stored.depth, "loaded refs node");
        Ok(self.alloc(Node {
            hash: Some(hash),
            persisted: true,
            depth: stored.depth,
            length: stored.length,
            body,
        }))
    }

    /// Arena index of child `slot` of `parent`, loading it if needed.
    fn child(&mut self, ctx: &Context, parent: usize, slot: usize) -> ObjectResult<usize> {
        let child = match &self.nodes[parent].body {
            Body::Branch(children) => children.get(slot).copied(),
            Body::Leaf(_) => None,
        }
        .ok_or_else(|| self.corrupt(parent, format!("no child {slot}")))?;

        match child {
            Child::Loaded(index) => Ok(index),
            Child::Unloaded(hash) => {
                let depth = self.nodes[parent].depth - 1;
                let loaded = self.load_node(ctx, hash, Some(depth))?;
                if let Body::Branch(children) = &mut self.nodes[parent].body {
                    children[slot] = Child::Loaded(loaded);
                }
                Ok(loaded)
            }
        }
    }

    /// Nodes from the root down to the leaf holding `index`, and the
    /// element's position in that leaf.
    fn path_to(&mut self, ctx: &Context, index: usize) -> ObjectResult<(Vec<usize>, usize)> {
        self.check_index(index)?;
        self.ensure_root(ctx)?;
        let Root::Loaded(mut node) = self.root else {
            return Err(ObjectError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        };

        let mut local = index as u64;
        let mut path = vec![node];
        while self.nodes[node].depth > 0 {
            let span = span(self.degree, self.nodes[node].depth);
            let child = (local / span) as usize;
            local %= span;
            node = self.child(ctx, node, child)?;
            path.push(node);
        }

        let pos = local as usize;
        if pos >= self.nodes[node].child_count() {
            return Err(self.corrupt(node, format!("leaf has no slot {pos}")));
        }
        Ok((path, pos))
    }

    fn locate(&mut self, ctx: &Context, index: usize) -> ObjectResult<(usize, usize)> {
        let (path, pos) = self.path_to(ctx, index)?;
        Ok((path[path.len() - 1], pos))
    }

    fn ensure_value(&mut self, ctx: &Context, leaf: usize, pos: usize) -> ObjectResult<()> {
        let hash = {
            let slot = &self.leaf_slots(leaf)?[pos];
            if slot.value.is_some() {
                return Ok(());
            }
            slot.hash
        };
        let bytes = ctx.store().get(&hash)?.ok_or(ObjectError::NotFound(hash))?;
        if !ContentHasher::OBJECT.verify(&bytes, &hash) {
            return Err(ObjectError::HashMismatch(hash));
        }
        let value = decode::<T>(&bytes)?;
        if let Body::Leaf(slots) = &mut self.nodes[leaf].body {
            slots[pos].value = Some(value);
        }
        Ok(())
    }

    fn push_slot(&mut self, ctx: &Context, slot: Slot<T>) -> ObjectResult<usize> {
        self.ensure_root(ctx)?;
        let position = self.length;

        let mut node = match self.root {
            Root::Empty => {
                let leaf = self.alloc(Node::empty(0));
                self.depth = 0;
                self.root = Root::Loaded(leaf);
                leaf
            }
            Root::Loaded(root) if position == self.capacity() => {
                let mut grown = Node::empty(self.depth + 1);
                grown.length = self.length;
                grown.body = Body::Branch(vec![Child::Loaded(root)]);
                let grown = self.alloc(grown);
                self.depth += 1;
                self.root = Root::Loaded(grown);
                grown
            }
            Root::Loaded(root) => root,
            Root::Unloaded(hash) => {
                return Err(ObjectError::CorruptNode {
                    id: hash,
                    reason: "root not loaded".into(),
                })
            }
        };

        // Walk down to the last leaf, creating nodes past the right edge.
        // Loads only happen before the first created node, so an error here
        // leaves the tree as it was.
        let mut local = position;
        let mut path = vec![node];
        while self.nodes[node].depth > 0 {
            let depth = self.nodes[node].depth;
            let span = span(self.degree, depth);
            let child = (local / span) as usize;
            local %= span;
            node = if child == self.nodes[node].child_count() {
                let fresh = self.alloc(Node::empty(depth - 1));
                if let Body::Branch(children) = &mut self.nodes[node].body {
                    children.push(Child::Loaded(fresh));
                }
                fresh
            } else {
                self.child(ctx, node, child)?
            };
            path.push(node);
        }
        if !matches!(self.nodes[node].body, Body::Leaf(_)) {
            return Err(self.corrupt(node, "expected a leaf"));
        }

        for &n in &path {
            let n = &mut self.nodes[n];
            n.length += 1;
            n.invalidate();
        }
        if let Body::Leaf(slots) = &mut self.nodes[node].body {
            slots.push(slot);
        }
        self.length += 1;
        Ok(position as usize)
    }

    fn collect_hashes(&mut self, ctx: &Context, node: usize, out: &mut Vec<ObjectId>) -> ObjectResult<()> {
        let count = match &self.nodes[node].body {
            Body::Leaf(slots) => {
                out.extend(slots.iter().map(|s| s.hash));
                return Ok(());
            }
            Body::Branch(children) => children.len(),
        };
        for slot in 0..count {
            let child = self.child(ctx, node, slot)?;
            self.collect_hashes(ctx, child, out)?;
        }
        Ok(())
    }

    fn build_index(&mut self, ctx: &Context) -> ObjectResult<HashMap<ObjectId, BTreeSet<usize>>> {
        let mut table: HashMap<ObjectId, BTreeSet<usize>> = HashMap::new();
        for (i, hash) in self.hashes(ctx)?.into_iter().enumerate() {
            table.entry(hash).or_default().insert(i);
        }
        Ok(table)
    }

    /// Hash `node` and every unpersisted node below it, queueing their
    /// encodings on `writes`.
    fn seal(&mut self, node: usize, writes: &mut Vec<(ObjectId, Vec<u8>)>) -> ObjectResult<ObjectId> {
        if let (true, Some(hash)) = (self.nodes[node].persisted, self.nodes[node].hash) {
            return Ok(hash);
        }

        let children: Vec<ObjectId> = match &self.nodes[node].body {
            Body::Leaf(slots) => slots.iter().map(|s| s.hash).collect(),
            Body::Branch(kids) => {
                let kids = kids.clone();
                let mut hashes = Vec::with_capacity(kids.len());
                for kid in kids {
                    hashes.push(match kid {
                        Child::Loaded(index) => self.seal(index, writes)?,
                        Child::Unloaded(hash) => hash,
                    });
                }
                hashes
            }
        };

        let stored = StoredNode {
            degree: self.degree,
            depth: self.nodes[node].depth,
            length: self.nodes[node].length,
            children,
        };
        let (hash, bytes) = ContentHasher::REFS
            .hash_encoded(&stored)
            .map_err(|e| ObjectError::encoding(T::SCHEMA, e))?;
        self.nodes[node].hash = Some(hash);
        writes.push((hash, bytes));
        Ok(hash)
    }
}

impl<T: Object> Default for Refs<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn store_value<T: Object>(ctx: &Context, value: &T) -> ObjectResult<ObjectId> {
    ctx.registry().check::<T>()?;
    let bytes = encode(value)?;
    let hash = ContentHasher::OBJECT.hash(&bytes);
    ctx.store().put(hash, bytes)?;
    Ok(hash)
}

impl<T> fmt::Debug for Refs<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refs")
            .field("degree", &self.degree)
            .field("len", &self.length)
            .field("root", &self.saved_root)
            .field("dirty", &self.is_dirty())
            .field("loaded_nodes", &self.nodes.len())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct RefsRepr {
    root: ObjectId,
    degree: u32,
    length: u64,
}

impl<T> Serialize for Refs<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_dirty() {
            return Err(ser::Error::custom(
                "Refs has unsaved changes; save it before encoding its parent",
            ));
        }
        RefsRepr {
            root: self.saved_root,
            degree: self.degree,
            length: self.length,
        }
        .serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Refs<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = RefsRepr::deserialize(deserializer)?;
        if repr.degree < 2 {
            return Err(de::Error::custom(format!("invalid Refs degree {}", repr.degree)));
        }
        if repr.root.is_null() != (repr.length == 0) {
            return Err(de::Error::custom("Refs root and length disagree"));
        }
        let mut refs = Self::empty(repr.degree);
        refs.length = repr.length;
        refs.saved_root = repr.root;
        if !repr.root.is_null() {
            refs.root = Root::Unloaded(repr.root);
        }
        Ok(refs)
    }
}

/// Handle to one element of a [`Refs`].
pub struct Ref<'a, T> {
    refs: &'a mut Refs<T>,
    index: usize,
    hash: ObjectId,
}

impl<T: Object> Ref<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current hash of the element.
    pub fn hash(&self) -> ObjectId {
        self.hash
    }

    pub fn value(&mut self, ctx: &Context) -> ObjectResult<&T> {
        self.refs.get(ctx, self.index)
    }

    pub fn set_value(&mut self, ctx: &Context, value: T) -> ObjectResult<()> {
        self.hash = self.refs.set_value(ctx, self.index, value)?;
        Ok(())
    }
}

impl<T> fmt::Debug for Ref<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("index", &self.index)
            .field("hash", &self.hash)
            .finish()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::object::object_hash;
    use crate::registry::Registry;
    use fg_store::InMemoryBlobStore;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item(u8);

    impl Object for Item {
        const SCHEMA: &'static str = "test.Item";
    }

    fn ctx() -> Context {
        let registry = Registry::builder().register::<Item>().unwrap().build();
        Context::new(Arc::new(InMemoryBlobStore::new()), registry)
    }

    proptest! {
        #[test]
        fn positions_and_hashes_survive_reload(
            values in prop::collection::vec(any::<u8>(), 0..60),
            degree in 2u32..6,
        ) {
            let ctx = ctx();
            let mut refs = Refs::with_degree(degree).unwrap();
            for v in &values {
                refs.append(&ctx, Item(*v)).unwrap();
            }
            refs.save(&ctx).unwrap();

            let mut reopened: Refs<Item> =
                bincode::deserialize(&bincode::serialize(&refs).unwrap()).unwrap();
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(reopened.get(&ctx, i).unwrap(), &Item(*v));
                let first = values.iter().position(|w| w == v);
                let h = object_hash(&Item(*v)).unwrap();
                prop_assert_eq!(reopened.index_of_hash(&ctx, &h).unwrap(), first);
            }
        }
    }
}
