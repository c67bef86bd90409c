use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fg_types::ObjectId;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// Filesystem blob store.
///
/// Layout mirrors a git object directory: the blob for hash `abcd…` lives
/// at `<root>/ab/cd…`. Each write goes to a temporary file in the target
/// directory and is renamed into place, so a blob is either absent or
/// complete.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened blob store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, id: ObjectId, data: Vec<u8>) -> StoreResult<()> {
        if id.is_null() {
            return Err(StoreError::NullKey);
        }
        let path = self.path_for(&id);
        if path.exists() {
            return Ok(());
        }
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Backend(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        debug!(id = %id.short_hex(), len = data.len(), "blob written");
        Ok(())
    }

    fn has(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.path_for(id).is_file())
    }
}
