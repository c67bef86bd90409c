use std::fmt;
use std::sync::Arc;

use fg_store::BlobStore;

use crate::registry::Registry;

/// Behaviour switches for collection operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFlags {
    /// Maintain a hash → index table so lookup by hash avoids a scan.
    pub hash_table_index: bool,
}

/// Everything a collection operation needs from its surroundings: where
/// bytes live, which schemas exist, and how to behave.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Context {
    store: Arc<dyn BlobStore>,
    registry: Arc<Registry>,
    flags: ContextFlags,
}

impl Context {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            flags: ContextFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn store_arc(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("registry", &self.registry)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
