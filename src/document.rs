//! Mapping between caller-facing objects and stored documents.
//!
//! Objects carry their identifier in `id`; stored documents carry it in
//! `_id`. Every other field, `_rev` included, is copied as-is, so the two
//! mapping functions are inverses of each other.

use serde_json::{Map, Value};

use crate::error::{BackendError, StoreError};

/// Identifier field on objects.
pub const ID: &str = "id";
/// Identifier field on stored documents.
pub const DOC_ID: &str = "_id";
/// Revision field, shared by objects and documents.
pub const REV: &str = "_rev";
/// Tombstone flag on stored documents.
pub const DELETED: &str = "_deleted";

/// Caller-facing record: open field map keyed by `id`.
pub type Object = Map<String, Value>;

/// Backend record: open field map keyed by `_id`.
pub type Document = Map<String, Value>;

/// Converts an object into its stored form, renaming `id` to `_id`.
///
/// Returns `InvalidArgument("Invalid object")` when the value is not a JSON
/// object (including `null`, which stands for an absent argument).
pub fn to_document(object: &Value) -> Result<Document, StoreError> {
    match object {
        Value::Object(map) => Ok(object_to_document(map)),
        _ => Err(StoreError::InvalidArgument("Invalid object")),
    }
}

/// Infallible variant of [`to_document`] for values already known to be maps.
pub fn object_to_document(object: &Object) -> Document {
    let mut document = Document::new();
    for (key, value) in object {
        match key.as_str() {
            ID => {
                document.insert(DOC_ID.to_string(), value.clone());
            }
            // `id` is authoritative for the stored identifier
            DOC_ID => {}
            _ => {
                document.insert(key.clone(), value.clone());
            }
        }
    }
    document
}

/// Converts a stored document into an object, renaming `_id` to `id`.
pub fn to_object(document: &Document) -> Object {
    let mut object = Object::new();
    for (key, value) in document {
        match key.as_str() {
            DOC_ID => {
                object.insert(ID.to_string(), value.clone());
            }
            ID if document.contains_key(DOC_ID) => {}
            _ => {
                object.insert(key.clone(), value.clone());
            }
        }
    }
    object
}

/// Shallow merge: every key of `changes` overwrites the same key on `target`.
///
/// Non-object `changes` merge nothing.
pub fn merge(target: &mut Object, changes: &Value) {
    if let Value::Object(changes) = changes {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Anything that can name a stored object: a bare identifier or an object
/// carrying an `id` field.
pub trait ObjectKey {
    fn object_id(&self) -> Option<&str>;
}

impl ObjectKey for str {
    fn object_id(&self) -> Option<&str> {
        Some(self)
    }
}

impl ObjectKey for String {
    fn object_id(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl ObjectKey for Object {
    fn object_id(&self) -> Option<&str> {
        self.get(ID).and_then(Value::as_str)
    }
}

impl ObjectKey for Value {
    fn object_id(&self) -> Option<&str> {
        match self {
            Value::String(id) => Some(id.as_str()),
            Value::Object(map) => map.object_id(),
            _ => None,
        }
    }
}

/// A single revision of a document as a backend persists it: identity,
/// revision and tombstone flag pulled out of the body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRevision {
    pub id: String,
    pub rev: String,
    pub deleted: bool,
    pub body: Map<String, Value>,
}

impl StoredRevision {
    /// Splits a full document (as returned by a remote peer) into its parts.
    pub fn from_document(mut document: Document) -> Result<Self, BackendError> {
        let id = match document.remove(DOC_ID) {
            Some(Value::String(id)) => id,
            _ => return Err(BackendError::InvalidDocument("missing _id".to_string())),
        };
        let rev = match document.remove(REV) {
            Some(Value::String(rev)) => rev,
            _ => {
                return Err(BackendError::InvalidDocument(format!(
                    "missing _rev for {}",
                    id
                )))
            }
        };
        let deleted = matches!(document.remove(DELETED), Some(Value::Bool(true)));
        Ok(Self {
            id,
            rev,
            deleted,
            body: document,
        })
    }

    /// Reassembles the full document: `_id`, `_rev`, `_deleted` (tombstones
    /// only), then the body fields.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert(DOC_ID.to_string(), Value::String(self.id.clone()));
        document.insert(REV.to_string(), Value::String(self.rev.clone()));
        if self.deleted {
            document.insert(DELETED.to_string(), Value::Bool(true));
        }
        for (key, value) in &self.body {
            document.insert(key.clone(), value.clone());
        }
        document
    }
}
