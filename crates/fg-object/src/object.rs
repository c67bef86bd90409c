//! The [`Object`] trait and its type-erased counterpart [`AnyObject`].

use std::any::Any;
use std::fmt;

use fg_crypto::ContentHasher;
use fg_types::ObjectId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Context;
use crate::error::{ObjectError, ObjectResult};

/// A value of a registered schema.
///
/// The encoding is bincode over the serde representation, which is
/// deterministic and length-prefixed. An object is stored under
/// `ContentHasher::OBJECT` of that encoding.
///
/// Objects holding [`Refs`](crate::Refs) collections override
/// [`save_refs`](Object::save_refs) to save them, so that the encoding
/// carries the collections' current root hashes.
pub trait Object: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Globally unique schema name, e.g. `"test.User"`.
    const SCHEMA: &'static str;

    fn save_refs(&mut self, _ctx: &Context) -> ObjectResult<()> {
        Ok(())
    }
}

/// Encode a value with its schema's canonical encoding.
pub fn encode<T: Object>(value: &T) -> ObjectResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ObjectError::encoding(T::SCHEMA, e))
}

pub fn decode<T: Object>(bytes: &[u8]) -> ObjectResult<T> {
    bincode::deserialize(bytes).map_err(|e| ObjectError::encoding(T::SCHEMA, e))
}

/// The hash a value is stored under.
pub fn object_hash<T: Object>(value: &T) -> ObjectResult<ObjectId> {
    Ok(ContentHasher::OBJECT.hash(&encode(value)?))
}

/// Object-safe view of an [`Object`], tagged with its schema name.
///
/// Packs hold their top-level values as `Box<dyn AnyObject>` and downcast
/// through [`as_any`](AnyObject::as_any) for typed access.
pub trait AnyObject: fmt::Debug + Send + Sync {
    fn schema(&self) -> &'static str;

    fn save_refs(&mut self, ctx: &Context) -> ObjectResult<()>;

    /// Canonical encoding and its hash.
    fn encode(&self) -> ObjectResult<(ObjectId, Vec<u8>)>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn clone_boxed(&self) -> Box<dyn AnyObject>;
}

impl<T: Object> AnyObject for T {
    fn schema(&self) -> &'static str {
        T::SCHEMA
    }

    fn save_refs(&mut self, ctx: &Context) -> ObjectResult<()> {
        Object::save_refs(self, ctx)
    }

    fn encode(&self) -> ObjectResult<(ObjectId, Vec<u8>)> {
        let bytes = encode(self)?;
        Ok((ContentHasher::OBJECT.hash(&bytes), bytes))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn AnyObject> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn AnyObject> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
        stars: u8,
    }

    impl Object for Note {
        const SCHEMA: &'static str = "test.Note";
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = Note { text: "hi".into(), stars: 3 };
        let b = a.clone();
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
        assert_eq!(object_hash(&a).unwrap(), object_hash(&b).unwrap());
    }

    #[test]
    fn different_values_hash_differently() {
        let a = Note { text: "hi".into(), stars: 3 };
        let b = Note { text: "hi".into(), stars: 4 };
        assert_ne!(object_hash(&a).unwrap(), object_hash(&b).unwrap());
    }

    #[test]
    fn object_hash_is_domain_separated() {
        let n = Note { text: "x".into(), stars: 0 };
        let bytes = encode(&n).unwrap();
        assert_eq!(object_hash(&n).unwrap(), ContentHasher::OBJECT.hash(&bytes));
        assert_ne!(object_hash(&n).unwrap(), ObjectId::digest(&bytes));
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let bytes = encode(&Note { text: "hello".into(), stars: 1 }).unwrap();
        let err = decode::<Note>(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ObjectError::Encoding { ref schema, .. } if schema == "test.Note"));
    }

    #[test]
    fn boxed_object_downcasts() {
        let boxed: Box<dyn AnyObject> = Box::new(Note { text: "a".into(), stars: 2 });
        assert_eq!(boxed.schema(), "test.Note");
        let (hash, bytes) = boxed.encode().unwrap();
        assert_eq!(hash, ContentHasher::OBJECT.hash(&bytes));

        let copy = boxed.clone();
        let note = copy.as_any().downcast_ref::<Note>().unwrap();
        assert_eq!(note.stars, 2);
        assert!(copy.as_any().downcast_ref::<String>().is_none());
    }
}
