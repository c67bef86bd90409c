use std::fmt;

use fg_crypto::{ChainLink, ContentHasher, Signature, SignatureError, SigningKey, VerifyingKey};
use fg_types::{FeedId, ObjectId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{RootError, RootResult};

/// A top-level object of a root, tagged with its schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dynamic {
    pub schema: String,
    pub object: ObjectId,
}

impl Dynamic {
    pub fn new(schema: impl Into<String>, object: ObjectId) -> Self {
        Self {
            schema: schema.into(),
            object,
        }
    }
}

/// Signed snapshot of a feed.
///
/// `seq` increases by one per root and `prev` is the hash of the root
/// before it (null at seq 0). The hash covers every field except `sig`;
/// `sig` is the feed key's signature over that hash.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub feed: FeedId,
    pub seq: u64,
    pub prev: ObjectId,
    pub timestamp: Timestamp,
    /// Digest of the schema registry the objects were written with.
    pub registry: ObjectId,
    pub refs: Vec<Dynamic>,
    pub sig: Signature,
}

impl Root {
    /// A root stamped with the current time and an empty signature.
    pub fn unsigned(
        feed: FeedId,
        seq: u64,
        prev: ObjectId,
        registry: ObjectId,
        refs: Vec<Dynamic>,
    ) -> Self {
        Self {
            feed,
            seq,
            prev,
            timestamp: Timestamp::now(),
            registry,
            refs,
            sig: Signature::empty(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_genesis(&self) -> bool {
        self.seq == 0 && self.prev.is_null()
    }

    /// Canonical bytes covered by the root hash.
    ///
    /// Fixed-width little-endian integers and u64 length prefixes, the same
    /// layout bincode gives these fields.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(120 + self.refs.len() * 56);
        out.extend_from_slice(self.feed.as_bytes());
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(self.prev.as_bytes());
        out.extend_from_slice(&self.timestamp.as_nanos().to_le_bytes());
        out.extend_from_slice(self.registry.as_bytes());
        out.extend_from_slice(&(self.refs.len() as u64).to_le_bytes());
        for entry in &self.refs {
            out.extend_from_slice(&(entry.schema.len() as u64).to_le_bytes());
            out.extend_from_slice(entry.schema.as_bytes());
            out.extend_from_slice(entry.object.as_bytes());
        }
        out
    }

    pub fn hash(&self) -> ObjectId {
        ContentHasher::ROOT.hash(&self.signing_bytes())
    }

    /// Sign with the feed's secret key.
    pub fn sign(&mut self, key: &SigningKey) -> Result<(), SignatureError> {
        if key.feed() != self.feed {
            return Err(SignatureError::KeyMismatch { feed: self.feed });
        }
        self.sig = key.sign_hash(&self.hash());
        Ok(())
    }

    pub fn signed(mut self, key: &SigningKey) -> Result<Self, SignatureError> {
        self.sign(key)?;
        Ok(self)
    }

    /// Check `sig` against the feed key and the current field values.
    pub fn verify(&self) -> Result<(), SignatureError> {
        VerifyingKey::from_feed(&self.feed)?.verify_hash(&self.hash(), &self.sig)
    }

    pub fn encode(&self) -> RootResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| RootError::Encoding(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> RootResult<Self> {
        bincode::deserialize(bytes).map_err(|e| RootError::Encoding(e.to_string()))
    }
}

impl ChainLink for Root {
    fn seq(&self) -> u64 {
        self.seq
    }

    fn link_hash(&self) -> ObjectId {
        self.hash()
    }

    fn prev_hash(&self) -> ObjectId {
        self.prev
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("feed", &self.feed)
            .field("seq", &self.seq)
            .field("prev", &self.prev)
            .field("timestamp", &self.timestamp)
            .field("refs", &self.refs.len())
            .field("signed", &!self.sig.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_crypto::RootChainVerifier;

    fn sample(key: &SigningKey) -> Root {
        Root::unsigned(
            key.feed(),
            0,
            ObjectId::null(),
            ObjectId::digest(b"registry"),
            vec![Dynamic::new("test.List", ObjectId::digest(b"list"))],
        )
        .with_timestamp(Timestamp::from_nanos(1_700_000_000_000_000_000))
    }

    #[test]
    fn hash_excludes_signature() {
        let key = SigningKey::generate();
        let root = sample(&key);
        let before = root.hash();
        let signed = root.signed(&key).unwrap();
        assert!(!signed.sig.is_empty());
        assert_eq!(signed.hash(), before);
    }

    #[test]
    fn signing_bytes_follow_bincode_layout() {
        let key = SigningKey::generate();
        let r = sample(&key);
        let expected =
            bincode::serialize(&(&r.feed, r.seq, &r.prev, r.timestamp, &r.registry, &r.refs))
                .unwrap();
        assert_eq!(r.signing_bytes(), expected);
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let key = SigningKey::generate();
        let base = sample(&key);
        let h = base.hash();

        let mut r = base.clone();
        r.seq = 1;
        assert_ne!(r.hash(), h);

        let mut r = base.clone();
        r.refs[0].schema = "test.Other".into();
        assert_ne!(r.hash(), h);

        let mut r = base.clone();
        r.registry = ObjectId::null();
        assert_ne!(r.hash(), h);

        let r = base.clone().with_timestamp(Timestamp::from_nanos(1));
        assert_ne!(r.hash(), h);
    }

    #[test]
    fn verify_detects_tampering() {
        let key = SigningKey::generate();
        let mut root = sample(&key).signed(&key).unwrap();
        assert!(root.verify().is_ok());

        root.refs.push(Dynamic::new("test.List", ObjectId::digest(b"extra")));
        assert_eq!(root.verify(), Err(SignatureError::InvalidSignature));
    }

    #[test]
    fn unsigned_root_does_not_verify() {
        let key = SigningKey::generate();
        assert_eq!(sample(&key).verify(), Err(SignatureError::InvalidSignature));
    }

    #[test]
    fn foreign_key_refused() {
        let key = SigningKey::generate();
        let other = SigningKey::generate();
        let err = sample(&key).signed(&other).unwrap_err();
        assert_eq!(err, SignatureError::KeyMismatch { feed: key.feed() });
    }

    #[test]
    fn encode_decode() {
        let key = SigningKey::generate();
        let root = sample(&key).signed(&key).unwrap();
        let back = Root::decode(&root.encode().unwrap()).unwrap();
        assert_eq!(back, root);
        assert!(back.verify().is_ok());
        assert!(matches!(Root::decode(&[1, 2, 3]), Err(RootError::Encoding(_))));
    }

    #[test]
    fn roots_form_a_chain() {
        let key = SigningKey::generate();
        let first = sample(&key).signed(&key).unwrap();
        let second = Root::unsigned(key.feed(), 1, first.hash(), first.registry, vec![])
            .signed(&key)
            .unwrap();
        let third = Root::unsigned(key.feed(), 2, second.hash(), first.registry, vec![])
            .signed(&key)
            .unwrap();
        assert!(first.is_genesis());
        assert!(RootChainVerifier::verify_from_genesis(&[first.clone(), second, third]).is_ok());

        let stray = Root::unsigned(key.feed(), 1, ObjectId::digest(b"fork"), first.registry, vec![]);
        assert!(RootChainVerifier::verify_chain(&[first, stray]).is_err());
    }

    #[test]
    fn json_view_for_debugging() {
        let key = SigningKey::generate();
        let json = serde_json::to_value(sample(&key)).unwrap();
        assert_eq!(json["seq"], 0);
        assert_eq!(json["refs"][0]["schema"], "test.List");
    }
}
