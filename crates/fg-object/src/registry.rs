//! Schema registry: schema name → decoder.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use fg_crypto::ContentHasher;
use fg_types::ObjectId;

use crate::error::{ObjectError, ObjectResult};
use crate::object::{decode, AnyObject, Object};

type DecodeFn = fn(&[u8]) -> ObjectResult<Box<dyn AnyObject>>;

fn decode_boxed<T: Object>(bytes: &[u8]) -> ObjectResult<Box<dyn AnyObject>> {
    Ok(Box::new(decode::<T>(bytes)?))
}

/// One registered schema.
#[derive(Clone, Copy)]
pub struct SchemaDescriptor {
    name: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

impl SchemaDescriptor {
    fn of<T: Object>() -> Self {
        Self {
            name: T::SCHEMA,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_boxed::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rust type bound to this schema, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn decode(&self, bytes: &[u8]) -> ObjectResult<Box<dyn AnyObject>> {
        (self.decode)(bytes)
    }

    pub fn is<T: Object>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDescriptor")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .finish()
    }
}

/// Immutable set of schemas known to a process.
///
/// Built once with [`Registry::builder`] and shared as `Arc<Registry>`.
/// Two registries with the same schema names have the same
/// [`digest`](Registry::digest); roots record it so a reader can tell
/// whether it is able to decode what a root points at.
pub struct Registry {
    schemas: BTreeMap<&'static str, SchemaDescriptor>,
    digest: ObjectId,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&SchemaDescriptor> {
        self.schemas.get(name)
    }

    pub fn resolve(&self, name: &str) -> ObjectResult<&SchemaDescriptor> {
        self.get(name)
            .ok_or_else(|| ObjectError::UnknownSchema(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Decode `bytes` as the schema called `name`.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> ObjectResult<Box<dyn AnyObject>> {
        self.resolve(name)?.decode(bytes)
    }

    /// Check that `T` is registered under its schema name.
    pub fn check<T: Object>(&self) -> ObjectResult<()> {
        match self.get(T::SCHEMA) {
            Some(desc) if desc.is::<T>() => Ok(()),
            Some(desc) => Err(ObjectError::encoding(
                T::SCHEMA,
                format!("schema is bound to {}", desc.type_name()),
            )),
            None => Err(ObjectError::encoding(T::SCHEMA, "schema is not registered")),
        }
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn digest(&self) -> ObjectId {
        self.digest
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("digest", &self.digest)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: BTreeMap<&'static str, SchemaDescriptor>,
}

impl RegistryBuilder {
    pub fn register<T: Object>(mut self) -> ObjectResult<Self> {
        let name = T::SCHEMA;
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ObjectError::InvalidSchemaName(name.to_string()));
        }
        if self.schemas.contains_key(name) {
            return Err(ObjectError::DuplicateSchema(name.to_string()));
        }
        self.schemas.insert(name, SchemaDescriptor::of::<T>());
        Ok(self)
    }

    pub fn build(self) -> Arc<Registry> {
        let listing = self.schemas.keys().copied().collect::<Vec<_>>().join("\n");
        let digest = ContentHasher::REGISTRY.hash(listing.as_bytes());
        Arc::new(Registry {
            schemas: self.schemas,
            digest,
        })
    }
}
