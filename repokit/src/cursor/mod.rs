//! Cursor pagination primitives
//!
//! A cursor captures the position of the last (or first) row of a page: its
//! identifier, the value of the sort field on that row, and the ordering the
//! page was produced with. [`CursorCodec`] turns cursors into opaque URL-safe
//! tokens and back; [`CursorQueryBuilder`] turns a decoded cursor into the
//! keyset predicate that selects the neighbouring page.

mod builder;
mod codec;

pub use builder::{CursorQueryBuilder, PageDirection, SortSpec};
pub use codec::CursorCodec;

use serde::{Deserialize, Serialize};

use crate::query::{FieldValue, SortOrder};
use crate::repository::{RepositoryError, RepositoryResult};

/// Sort-field value captured in a cursor, tagged with its logical type
///
/// Serialized as `{"type": "int", "value": 42}` so integers, floats and
/// strings survive the JSON round trip without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CursorValue {
    /// 64-bit integer
    #[serde(rename = "int")]
    Integer(i64),
    /// Finite 64-bit float
    #[serde(rename = "float")]
    Float(f64),
    /// String
    #[serde(rename = "string")]
    String(String),
}

impl CursorValue {
    /// Capture a JSON scalar; objects, arrays, booleans and null have no cursor form
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            _ => None,
        }
    }

    /// Value to compare against in a keyset predicate
    pub fn to_field_value(&self) -> FieldValue {
        match self {
            Self::Integer(n) => FieldValue::Integer(*n),
            Self::Float(n) => FieldValue::Float(*n),
            Self::String(s) => FieldValue::String(s.clone()),
        }
    }
}

impl From<i64> for CursorValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for CursorValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for CursorValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for CursorValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Decoded position within an ordered result set
///
/// # Example
///
/// ```rust
/// use repokit::cursor::{CursorData, CursorValue};
/// use repokit::query::SortOrder;
///
/// let cursor = CursorData::new("p_7", 12_i64, "votes", SortOrder::Desc);
/// assert!(cursor.validate().is_ok());
/// assert_eq!(cursor.value, CursorValue::Integer(12));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CursorData {
    /// Identifier of the edge row
    pub id: String,
    /// Sort-field value of the edge row
    pub value: CursorValue,
    /// Creation time in epoch milliseconds (informational)
    pub timestamp: i64,
    /// Field the page was sorted by
    pub sort_field: String,
    /// Direction the page was sorted in
    pub direction: SortOrder,
}

impl CursorData {
    /// Create a cursor stamped with the current time
    pub fn new(
        id: impl Into<String>,
        value: impl Into<CursorValue>,
        sort_field: impl Into<String>,
        direction: SortOrder,
    ) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            sort_field: sort_field.into(),
            direction,
        }
    }

    /// Check the cursor is usable for query construction
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.id.is_empty() {
            return Err(RepositoryError::validation_failed("cursor id must not be empty"));
        }
        if self.sort_field.is_empty() {
            return Err(RepositoryError::validation_failed(
                "cursor sort field must not be empty",
            ));
        }
        if let CursorValue::Float(n) = self.value {
            if !n.is_finite() {
                return Err(RepositoryError::validation_failed(
                    "cursor value must be a finite number",
                ));
            }
        }
        Ok(())
    }
}
