//! Backend-agnostic query model
//!
//! Services describe what they want with [`Field`]s grouped into a
//! [`QueryModel`]; adapters translate the model into parameterized SQL or
//! SurrealQL. Field names are validated identifiers, values are always bound.
//!
//! # Example
//!
//! ```rust
//! use repokit::query::{Field, QueryModel, SortKey};
//!
//! let query = QueryModel::from_conditions([
//!     Field::eq("owner_id", "u_42"),
//!     Field::gte("stats.views", 100_i64),
//!     Field::in_list("status", vec!["draft".to_string(), "published".to_string()]),
//! ]);
//! let sort = vec![SortKey::desc("created_at"), SortKey::desc("id")];
//! # let _ = (query, sort);
//! ```

mod field;
mod model;
mod sort;

pub use field::{
    validate_collection_name, validate_field_name, Field, FieldTarget, FieldValue,
    FilterOperator, MetaColumn,
};
pub use model::QueryModel;
pub use sort::{SortKey, SortOrder};
