use fg_types::ObjectId;

/// Domain-separated BLAKE3 content hasher.
///
/// Every stored byte string is hashed with a domain tag describing what it
/// is, so an object and a Refs node with identical bytes never share a key.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Encoded values of registered schemas.
    pub const OBJECT: Self = Self::new("fg-object-v1");
    /// Refs tree nodes.
    pub const REFS: Self = Self::new("fg-refs-v1");
    /// Canonical (unsigned) root encodings.
    pub const ROOT: Self = Self::new("fg-root-v1");
    /// Schema registry digests.
    pub const REGISTRY: Self = Self::new("fg-registry-v1");

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ObjectId::from_hash(*hasher.finalize().as_bytes())
    }

    /// Encode `value` with bincode and hash the result.
    ///
    /// Returns the bytes as well, since callers almost always store them.
    pub fn hash_encoded<T: serde::Serialize>(
        &self,
        value: &T,
    ) -> Result<(ObjectId, Vec<u8>), HasherError> {
        let data =
            bincode::serialize(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok((self.hash(&data), data))
    }

    pub fn verify(&self, data: &[u8], expected: &ObjectId) -> bool {
        self.hash(data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
