//! Foundation types for feedgraph.
//!
//! Every other `fg-*` crate depends on this one. It is deliberately small:
//! identifiers and clocks, no I/O.
//!
//! # Key Types
//!
//! - [`ObjectId`]: content hash of an encoded object, node, or root (BLAKE3)
//! - [`FeedId`]: public key identifying an independently sequenced feed
//! - [`Timestamp`]: nanoseconds since the UNIX epoch

pub mod error;
pub mod feed;
pub mod hash;
pub mod timestamp;

pub use error::TypeError;
pub use feed::FeedId;
pub use hash::ObjectId;
pub use timestamp::Timestamp;
