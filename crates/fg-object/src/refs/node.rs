//! Arena nodes of a Refs tree and their persisted form.

use fg_types::ObjectId;
use serde::{Deserialize, Serialize};

/// Persisted form of a node. Hashed with `ContentHasher::REFS`.
///
/// At depth 0 `children` are element hashes; above that they are the hashes
/// of child nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredNode {
    pub degree: u32,
    pub depth: u32,
    pub length: u64,
    pub children: Vec<ObjectId>,
}

/// One element of a leaf: its current hash and, once read, its value.
#[derive(Debug, Clone)]
pub(crate) struct Slot<T> {
    pub hash: ObjectId,
    pub value: Option<T>,
}

/// Pointer from a branch to a child node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Child {
    /// Index into the arena.
    Loaded(usize),
    /// Persisted but not yet read from the store.
    Unloaded(ObjectId),
}

#[derive(Debug, Clone)]
pub(crate) enum Body<T> {
    Leaf(Vec<Slot<T>>),
    Branch(Vec<Child>),
}

#[derive(Debug, Clone)]
pub(crate) struct Node<T> {
    /// `None` while the node's content differs from what was last hashed.
    pub hash: Option<ObjectId>,
    /// Whether the bytes for `hash` are known to be in the store.
    pub persisted: bool,
    pub depth: u32,
    /// Number of elements below this node.
    pub length: u64,
    pub body: Body<T>,
}

impl<T> Node<T> {
    /// A fresh, empty node at `depth`.
    pub fn empty(depth: u32) -> Self {
        let body = if depth == 0 {
            Body::Leaf(Vec::new())
        } else {
            Body::Branch(Vec::new())
        };
        Self {
            hash: None,
            persisted: false,
            depth,
            length: 0,
            body,
        }
    }

    /// Content changed: the cached hash and persisted state no longer hold.
    pub fn invalidate(&mut self) {
        self.hash = None;
        self.persisted = false;
    }

    pub fn child_count(&self) -> usize {
        match &self.body {
            Body::Leaf(slots) => slots.len(),
            Body::Branch(children) => children.len(),
        }
    }
}

/// Number of elements a child of a node at `depth` can hold.
pub(crate) fn span(degree: u32, depth: u32) -> u64 {
    u64::from(degree).saturating_pow(depth)
}
