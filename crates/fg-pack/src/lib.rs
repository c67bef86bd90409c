//! Pack sessions over feeds.
//!
//! A [`Container`] ties together the blob store, schema registry, root
//! manager and an optional [`Publisher`]. [`Container::new_pack`] opens a
//! [`Pack`]: a mutable view of a feed's latest root. Saving a pack writes
//! the changed objects, signs the next root, records it, and publishes it.
//!
//! ```text
//! Container::new_pack ──► Pack ── append / get_mut / set ──► save ──► Root
//!                                                             │
//!                                          RootManager::append ┘──► Publisher
//! ```

pub mod container;
pub mod error;
pub mod pack;
pub mod publish;

pub use container::Container;
pub use error::{PackError, PackResult};
pub use pack::{Pack, PackFlags, PackState};
pub use publish::{PublishError, Publisher};
