//! Root snapshots and the root manager.
//!
//! A [`Root`] is a signed snapshot of a feed: the hashes of its top-level
//! objects plus a link to the previous root. The [`RootManager`] keeps the
//! chain of roots for every known feed and refuses anything that would
//! fork, skip, or replay it.

pub mod error;
pub mod manager;
pub mod root;

pub use error::{RootError, RootResult};
pub use manager::RootManager;
pub use root::{Dynamic, Root};
