//! Error types for object and collection operations.

use fg_store::StoreError;
use fg_types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    /// A value could not be encoded or decoded under its schema.
    #[error("encoding error for schema {schema}: {reason}")]
    Encoding { schema: String, reason: String },

    /// No schema with this name is registered.
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("schema already registered: {0}")]
    DuplicateSchema(String),

    #[error("invalid schema name: {0:?}")]
    InvalidSchemaName(String),

    /// The requested hash is not present (in a collection or in the store).
    #[error("not found: {0}")]
    NotFound(ObjectId),

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid Refs degree {0}: must be at least 2")]
    InvalidDegree(u32),

    /// A stored Refs node is malformed or inconsistent with its parent.
    #[error("corrupt Refs node {id}: {reason}")]
    CorruptNode { id: ObjectId, reason: String },

    /// Stored bytes do not hash to the key they were read from.
    #[error("hash mismatch for {0}")]
    HashMismatch(ObjectId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ObjectError {
    pub(crate) fn encoding(schema: &str, reason: impl ToString) -> Self {
        Self::Encoding {
            schema: schema.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ObjectResult<T> = Result<T, ObjectError>;
