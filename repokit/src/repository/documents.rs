//! Stored document shapes and result envelopes
//!
//! Every collection stores the same envelope: identifier, owner, creation and
//! modification timestamps (epoch milliseconds), and a JSON object body.
//! Caller types are decoded by flattening the metadata into the body, so a
//! struct with `id` and `owner_id` fields next to its own attributes
//! deserializes directly.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use super::{RepositoryError, RepositoryOperation, RepositoryResult};
use crate::query::MetaColumn;

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a time-ordered document identifier
pub fn new_document_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Document about to be inserted
///
/// # Example
///
/// ```rust
/// use repokit::repository::NewDocument;
/// use serde_json::json;
///
/// let doc = NewDocument::from_serializable(
///     "p_1",
///     "u_1",
///     &json!({"id": "ignored", "title": "Hello", "votes": 0}),
/// )
/// .unwrap();
///
/// assert_eq!(doc.created_at, doc.updated_at);
/// assert!(!doc.data.contains_key("id"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Unique identifier within the collection
    pub id: String,
    /// Owning principal
    pub owner_id: String,
    /// Creation time in epoch milliseconds
    pub created_at: i64,
    /// Modification time in epoch milliseconds
    pub updated_at: i64,
    /// Document body
    pub data: Map<String, Value>,
}

impl NewDocument {
    /// Document stamped with the current time
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, data: Map<String, Value>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
            data,
        }
    }

    /// Document whose body is a serialized caller value
    ///
    /// Keys naming metadata columns are dropped from the body; the envelope is
    /// the only source of truth for them.
    pub fn from_serializable<T: Serialize>(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        value: &T,
    ) -> RepositoryResult<Self> {
        let data = match serde_json::to_value(value).map_err(|e| {
            RepositoryError::serialization_error(RepositoryOperation::Save, e.to_string())
        })? {
            Value::Object(mut map) => {
                map.retain(|key, _| MetaColumn::resolve(key).is_none());
                map
            }
            other => {
                return Err(RepositoryError::serialization_error(
                    RepositoryOperation::Save,
                    format!("document body must be a JSON object, got {}", json_kind(&other)),
                ))
            }
        };
        Ok(Self::new(id, owner_id, data))
    }

    /// Override both timestamps
    #[must_use]
    pub fn with_timestamps(mut self, created_at: i64, updated_at: i64) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    /// Check the envelope before it reaches a backend
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.id.is_empty() {
            return Err(RepositoryError::validation_failed("document id must not be empty")
                .with_operation(RepositoryOperation::Save));
        }
        if self.owner_id.is_empty() {
            return Err(RepositoryError::validation_failed("owner id must not be empty")
                .with_operation(RepositoryOperation::Save));
        }
        Ok(())
    }
}

/// Document read back from a collection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Unique identifier within the collection
    pub id: String,
    /// Owning principal
    pub owner_id: String,
    /// Creation time in epoch milliseconds
    pub created_at: i64,
    /// Modification time in epoch milliseconds
    pub updated_at: i64,
    /// Document body
    pub data: Map<String, Value>,
}

impl StoredDocument {
    /// Look up a logical field, metadata or dotted body path
    ///
    /// ```rust
    /// use repokit::repository::StoredDocument;
    /// use serde_json::json;
    ///
    /// let doc = StoredDocument {
    ///     id: "p_1".into(),
    ///     owner_id: "u_1".into(),
    ///     created_at: 1,
    ///     updated_at: 2,
    ///     data: json!({"stats": {"views": 9}}).as_object().unwrap().clone(),
    /// };
    /// assert_eq!(doc.field("stats.views"), Some(json!(9)));
    /// assert_eq!(doc.field("createdAt"), Some(json!(1)));
    /// assert_eq!(doc.field("missing"), None);
    /// ```
    pub fn field(&self, name: &str) -> Option<Value> {
        match MetaColumn::resolve(name) {
            Some(MetaColumn::Id) => Some(Value::from(self.id.as_str())),
            Some(MetaColumn::OwnerId) => Some(Value::from(self.owner_id.as_str())),
            Some(MetaColumn::CreatedAt) => Some(Value::from(self.created_at)),
            Some(MetaColumn::UpdatedAt) => Some(Value::from(self.updated_at)),
            None => {
                let mut segments = name.split('.');
                let first = segments.next()?;
                let mut current = self.data.get(first)?;
                for segment in segments {
                    current = current.get(segment)?;
                }
                Some(current.clone())
            }
        }
    }

    /// Body with metadata flattened in
    pub fn to_flat_json(&self) -> Value {
        let mut map = self.data.clone();
        map.insert("id".to_string(), Value::from(self.id.as_str()));
        map.insert("owner_id".to_string(), Value::from(self.owner_id.as_str()));
        map.insert("created_at".to_string(), Value::from(self.created_at));
        map.insert("updated_at".to_string(), Value::from(self.updated_at));
        Value::Object(map)
    }

    /// Decode into a caller type
    pub fn decode<T: DeserializeOwned>(&self) -> RepositoryResult<T> {
        serde_json::from_value(self.to_flat_json()).map_err(|e| {
            RepositoryError::serialization_error(RepositoryOperation::Find, e.to_string())
                .with_entity_type(std::any::type_name::<T>())
        })
    }
}

/// Exactly one document
#[derive(Debug, Clone, PartialEq)]
pub struct SingleResult {
    document: StoredDocument,
}

impl SingleResult {
    /// Wrap a document
    pub fn new(document: StoredDocument) -> Self {
        Self { document }
    }

    /// Borrow the document
    pub fn document(&self) -> &StoredDocument {
        &self.document
    }

    /// Take the document
    pub fn into_document(self) -> StoredDocument {
        self.document
    }

    /// Decode into a caller type
    pub fn decode<T: DeserializeOwned>(&self) -> RepositoryResult<T> {
        self.document.decode()
    }
}

/// Ordered documents returned by a find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    documents: Vec<StoredDocument>,
}

impl QueryResult {
    /// Wrap documents in storage order
    pub fn new(documents: Vec<StoredDocument>) -> Self {
        Self { documents }
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no document matched
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Iterate in storage order
    pub fn iter(&self) -> std::slice::Iter<'_, StoredDocument> {
        self.documents.iter()
    }

    /// Borrow the documents
    pub fn documents(&self) -> &[StoredDocument] {
        &self.documents
    }

    /// Take the documents
    pub fn into_documents(self) -> Vec<StoredDocument> {
        self.documents
    }

    /// Decode every document into a caller type
    pub fn decode_all<T: DeserializeOwned>(&self) -> RepositoryResult<Vec<T>> {
        self.documents.iter().map(StoredDocument::decode).collect()
    }
}

impl IntoIterator for QueryResult {
    type Item = StoredDocument;
    type IntoIter = std::vec::IntoIter<StoredDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a StoredDocument;
    type IntoIter = std::slice::Iter<'a, StoredDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
