//! Content-addressed blob storage for feedgraph.
//!
//! The store is the bottom of the stack: an opaque map from [`ObjectId`] to
//! bytes. It never interprets what it holds. Objects, Refs tree nodes and
//! roots all live here, under hashes computed by the layers above.
//!
//! # Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`] -- `HashMap` behind a `RwLock`, for tests and
//!   in-memory nodes
//! - [`FsBlobStore`] -- one file per blob in a fan-out directory
//!
//! # Rules
//!
//! 1. Blobs are immutable: a second `put` under an existing key is a no-op.
//! 2. A `put` is atomic per key; readers never observe half-written bytes.
//! 3. Concurrent reads are always safe.
//! 4. I/O errors are propagated, never swallowed.
//!
//! [`ObjectId`]: fg_types::ObjectId

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;
pub use traits::BlobStore;
