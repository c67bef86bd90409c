//! Cryptographic primitives for feedgraph.
//!
//! Domain-separated BLAKE3 hashing for everything that is stored, Ed25519
//! keys for feeds and root signatures, and verification of root chains.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod chain;
pub mod hasher;
pub mod signer;

pub use chain::{ChainError, ChainLink, RootChainVerifier};
pub use hasher::{ContentHasher, HasherError};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
