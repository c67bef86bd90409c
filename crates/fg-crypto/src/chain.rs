use fg_types::ObjectId;

/// A link in a feed's root chain.
pub trait ChainLink {
    /// Position of this link in the feed, starting at 0.
    fn seq(&self) -> u64;
    /// Hash identifying this link.
    fn link_hash(&self) -> ObjectId;
    /// Hash of the previous link (null for the first).
    fn prev_hash(&self) -> ObjectId;
}

/// Checks that a run of roots forms an unbroken chain.
///
/// Each root after the first must carry `seq = previous.seq + 1` and
/// `prev = previous hash`. The run may start anywhere in the feed; use
/// [`RootChainVerifier::verify_from_genesis`] to also require that it starts
/// at sequence 0.
pub struct RootChainVerifier;

impl RootChainVerifier {
    pub fn verify_chain(links: &[impl ChainLink]) -> Result<(), ChainError> {
        for i in 1..links.len() {
            let (prev, cur) = (&links[i - 1], &links[i]);
            if cur.seq() != prev.seq() + 1 {
                return Err(ChainError::SequenceGap {
                    index: i,
                    expected: prev.seq() + 1,
                    found: cur.seq(),
                });
            }
            if cur.prev_hash() != prev.link_hash() {
                return Err(ChainError::BrokenLink { index: i });
            }
        }
        Ok(())
    }

    pub fn verify_from_genesis(links: &[impl ChainLink]) -> Result<(), ChainError> {
        if let Some(first) = links.first() {
            if first.seq() != 0 || !first.prev_hash().is_null() {
                return Err(ChainError::InvalidGenesis);
            }
        }
        Self::verify_chain(links)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("first root must have seq 0 and no previous hash")]
    InvalidGenesis,

    #[error("sequence gap at index {index}: expected {expected}, found {found}")]
    SequenceGap { index: usize, expected: u64, found: u64 },

    #[error("broken link at index {index}: previous hash does not match")]
    BrokenLink { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Link {
        seq: u64,
        hash: ObjectId,
        prev: ObjectId,
    }

    impl ChainLink for Link {
        fn seq(&self) -> u64 {
            self.seq
        }
        fn link_hash(&self) -> ObjectId {
            self.hash
        }
        fn prev_hash(&self) -> ObjectId {
            self.prev
        }
    }

    fn build_chain(start: u64, count: u64) -> Vec<Link> {
        let mut prev = if start == 0 {
            ObjectId::null()
        } else {
            ObjectId::digest(&(start - 1).to_le_bytes())
        };
        (start..start + count)
            .map(|seq| {
                let hash = ObjectId::digest(&seq.to_le_bytes());
                let link = Link { seq, hash, prev };
                prev = hash;
                link
            })
            .collect()
    }

    #[test]
    fn empty_and_single_chains_are_valid() {
        assert!(RootChainVerifier::verify_from_genesis(&Vec::<Link>::new()).is_ok());
        assert!(RootChainVerifier::verify_from_genesis(&build_chain(0, 1)).is_ok());
    }

    #[test]
    fn chain_may_start_mid_feed() {
        let chain = build_chain(5, 4);
        assert!(RootChainVerifier::verify_chain(&chain).is_ok());
        assert_eq!(
            RootChainVerifier::verify_from_genesis(&chain),
            Err(ChainError::InvalidGenesis)
        );
    }

    #[test]
    fn gap_detected() {
        let mut chain = build_chain(0, 3);
        chain.remove(1);
        assert_eq!(
            RootChainVerifier::verify_chain(&chain),
            Err(ChainError::SequenceGap { index: 1, expected: 1, found: 2 })
        );
    }

    #[test]
    fn fork_detected() {
        let mut chain = build_chain(0, 3);
        chain[2].prev = ObjectId::digest(b"fork");
        assert_eq!(
            RootChainVerifier::verify_chain(&chain),
            Err(ChainError::BrokenLink { index: 2 })
        );
    }
}
