//! Object model for feedgraph.
//!
//! Application values are plain serde types implementing [`Object`]. They are
//! encoded with bincode and stored under the domain-separated hash of that
//! encoding. A [`Registry`] maps schema names to decoders so that values
//! named in a root can be turned back into typed objects.
//!
//! [`Refs`] is the ordered, hash-addressable collection objects use to point
//! at other objects. It is a Merkle tree with bounded fan-out: after a
//! mutation only the path from the changed element to the root is rehashed
//! and rewritten, and untouched subtrees keep their hashes.
//!
//! # Modules
//!
//! - [`object`]: the [`Object`] trait, type-erased [`AnyObject`], encoding
//! - [`registry`]: [`Registry`] and its builder
//! - [`context`]: [`Context`], the store + registry + flags passed to operations
//! - [`refs`]: the [`Refs`] collection and its [`Ref`] handle

pub mod context;
pub mod error;
pub mod object;
pub mod refs;
pub mod registry;

pub use context::{Context, ContextFlags};
pub use error::{ObjectError, ObjectResult};
pub use object::{decode, encode, object_hash, AnyObject, Object};
pub use refs::{Ref, Refs, DEFAULT_DEGREE};
pub use registry::{Registry, RegistryBuilder, SchemaDescriptor};
