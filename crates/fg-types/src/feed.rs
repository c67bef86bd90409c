use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{parse_hex32, TypeError};

/// Identifier of a feed: the raw bytes of its Ed25519 public key.
///
/// `FeedId` only carries the bytes. Turning it into a key that can verify
/// signatures is done by `fg_crypto::VerifyingKey::from_feed`, which rejects
/// byte strings that are not valid curve points.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedId([u8; 32]);

impl FeedId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in logs: `feed:` plus the first 8 hex characters.
    pub fn short_id(&self) -> String {
        format!("feed:{}", hex::encode(&self.0[..4]))
    }

    /// Parse from 64 hex characters, with or without the `feed:` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("feed:").unwrap_or(s);
        parse_hex32(s).map(Self)
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", self.short_id())
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_id())
    }
}

impl FromStr for FeedId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_format() {
        let feed = FeedId::from_bytes([0xab; 32]);
        assert_eq!(feed.short_id(), "feed:abababab");
        assert_eq!(format!("{feed}"), "feed:abababab");
    }

    #[test]
    fn hex_roundtrip_with_and_without_prefix() {
        let feed = FeedId::from_bytes([7; 32]);
        assert_eq!(FeedId::from_hex(&feed.to_hex()).unwrap(), feed);
        let prefixed = format!("feed:{}", feed.to_hex());
        assert_eq!(prefixed.parse::<FeedId>().unwrap(), feed);
    }

    #[test]
    fn ordering_follows_bytes() {
        assert!(FeedId::from_bytes([0; 32]) < FeedId::from_bytes([1; 32]));
    }
}
