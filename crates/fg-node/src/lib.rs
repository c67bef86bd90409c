//! Feedgraph node.
//!
//! A [`Node`] owns the storage stack of a process (blob store, root
//! manager, pack container) and the [`FeedHub`] that fans saved and
//! received roots out to subscribers. It also carries the process-wide
//! cancellation token the write loop watches between ticks.

pub mod config;
pub mod error;
pub mod hub;
pub mod node;

pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use hub::{FeedHub, RootStream};
pub use node::Node;
