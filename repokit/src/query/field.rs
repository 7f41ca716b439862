//! Filter fields, operators and values
//!
//! A [`Field`] is one comparison inside a [`QueryModel`](super::QueryModel).
//! Field names are logical attribute names, never raw SQL: they are validated
//! against a dotted-identifier grammar and resolved either to one of the four
//! metadata columns every stored document carries or to a path inside the
//! document body.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::repository::{RepositoryError, RepositoryResult};

/// Dotted identifier path, e.g. `stats.views`
static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("field name regex is valid")
});

/// Plain identifier short enough for any backend's table names
static COLLECTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("collection name regex is valid")
});

/// Reject anything that is not a dotted identifier path
pub fn validate_field_name(name: &str) -> RepositoryResult<()> {
    if FIELD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(RepositoryError::validation_failed(format!(
            "invalid field name '{}'",
            name
        )))
    }
}

/// Reject collection names that cannot be used as a table identifier
pub fn validate_collection_name(collection: &str) -> RepositoryResult<()> {
    if COLLECTION_NAME.is_match(collection) {
        Ok(())
    } else {
        Err(RepositoryError::validation_failed(format!(
            "invalid collection name '{}'",
            collection
        ))
        .with_entity_type(collection))
    }
}

/// Comparison operators for filter fields
///
/// # Example
///
/// ```rust
/// use repokit::query::FilterOperator;
///
/// assert_eq!(format!("{}", FilterOperator::Equal), "=");
/// assert_eq!(format!("{}", FilterOperator::IsNotNull), "IS NOT NULL");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Pattern matching with `%` wildcards (LIKE)
    Like,
    /// Value is in a list (IN)
    In,
    /// Value is null (IS NULL)
    IsNull,
    /// Value is not null (IS NOT NULL)
    IsNotNull,
}

impl FilterOperator {
    /// SQL spelling of the operator
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator ignores the field value
    #[must_use]
    pub const fn is_unary(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// A value that can be used in filter fields
///
/// # Example
///
/// ```rust
/// use repokit::query::FieldValue;
///
/// let string_val: FieldValue = "published".into();
/// let int_val: FieldValue = 42_i64.into();
/// let list_val: FieldValue = vec!["a".to_string(), "b".to_string()].into();
/// assert!(list_val.is_list());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// String value
    String(String),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// List of string values (for IN operator)
    StringList(Vec<String>),
    /// List of integer values (for IN operator)
    IntegerList(Vec<i64>),
    /// Null value (for IS NULL / IS NOT NULL)
    Null,
}

impl FieldValue {
    /// Whether this is one of the list variants
    pub fn is_list(&self) -> bool {
        matches!(self, Self::StringList(_) | Self::IntegerList(_))
    }

    /// Whether comparisons against this value should be numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_) | Self::IntegerList(_))
    }

    /// JSON representation used by document-store bindings
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::from(s.as_str()),
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Float(n) => serde_json::Value::from(*n),
            Self::Boolean(b) => serde_json::Value::from(*b),
            Self::StringList(list) => serde_json::Value::from(list.clone()),
            Self::IntegerList(list) => serde_json::Value::from(list.clone()),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(list: Vec<String>) -> Self {
        Self::StringList(list)
    }
}

impl From<Vec<i64>> for FieldValue {
    fn from(list: Vec<i64>) -> Self {
        Self::IntegerList(list)
    }
}

/// Metadata columns carried by every stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaColumn {
    /// Document identifier
    Id,
    /// Owning principal
    OwnerId,
    /// Creation time in epoch milliseconds
    CreatedAt,
    /// Last modification time in epoch milliseconds
    UpdatedAt,
}

impl MetaColumn {
    /// Resolve a logical name (snake or camel case) to a metadata column
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "id" | "_id" => Some(Self::Id),
            "owner_id" | "ownerId" => Some(Self::OwnerId),
            "created_at" | "createdAt" => Some(Self::CreatedAt),
            "updated_at" | "updatedAt" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    /// Relational column name
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::OwnerId => "owner_id",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Where a field name points once resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTarget {
    /// One of the metadata columns
    Meta(MetaColumn),
    /// Path segments inside the document body
    Body(Vec<String>),
}

impl FieldTarget {
    /// Validate and resolve a field name
    ///
    /// `nested` forces a body lookup even for names that match a metadata
    /// column, so a body attribute literally called `id` stays reachable.
    ///
    /// ```rust
    /// use repokit::query::{FieldTarget, MetaColumn};
    ///
    /// let target = FieldTarget::resolve("ownerId", false).unwrap();
    /// assert_eq!(target, FieldTarget::Meta(MetaColumn::OwnerId));
    ///
    /// let target = FieldTarget::resolve("stats.views", false).unwrap();
    /// assert_eq!(target, FieldTarget::Body(vec!["stats".into(), "views".into()]));
    /// ```
    pub fn resolve(name: &str, nested: bool) -> RepositoryResult<Self> {
        validate_field_name(name)?;
        if !nested {
            if let Some(column) = MetaColumn::resolve(name) {
                return Ok(Self::Meta(column));
            }
        }
        Ok(Self::Body(name.split('.').map(str::to_string).collect()))
    }

    /// Whether the target is the document identifier
    pub fn is_identifier(&self) -> bool {
        matches!(self, Self::Meta(MetaColumn::Id))
    }
}

/// A single comparison inside a query model
///
/// # Example
///
/// ```rust
/// use repokit::query::{Field, FilterOperator};
///
/// let published = Field::eq("status", "published");
/// let popular = Field::gt("votes", 10_i64);
/// let unmoderated = Field::is_null("moderation.reviewed_by");
///
/// assert_eq!(popular.operator, FilterOperator::GreaterThan);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Logical attribute name
    pub name: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: FieldValue,
    /// Force lookup inside the document body
    pub nested: bool,
}

impl Field {
    /// Create a new field
    pub fn new(name: impl Into<String>, operator: FilterOperator, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            operator,
            value,
            nested: false,
        }
    }

    /// Equality (name = value)
    pub fn eq(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::Equal, value.into())
    }

    /// Inequality (name != value)
    pub fn ne(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::NotEqual, value.into())
    }

    /// Greater than (name > value)
    pub fn gt(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::GreaterThan, value.into())
    }

    /// Greater than or equal (name >= value)
    pub fn gte(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::GreaterThanOrEqual, value.into())
    }

    /// Less than (name < value)
    pub fn lt(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::LessThan, value.into())
    }

    /// Less than or equal (name <= value)
    pub fn lte(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::LessThanOrEqual, value.into())
    }

    /// Pattern match with `%` wildcards
    pub fn like(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(name, FilterOperator::Like, FieldValue::String(pattern.into()))
    }

    /// Membership in a list
    pub fn in_list(name: impl Into<String>, values: impl Into<FieldValue>) -> Self {
        Self::new(name, FilterOperator::In, values.into())
    }

    /// Attribute is null or absent
    pub fn is_null(name: impl Into<String>) -> Self {
        Self::new(name, FilterOperator::IsNull, FieldValue::Null)
    }

    /// Attribute is present and not null
    pub fn is_not_null(name: impl Into<String>) -> Self {
        Self::new(name, FilterOperator::IsNotNull, FieldValue::Null)
    }

    /// Force lookup inside the document body
    #[must_use]
    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    /// Validate and resolve the field name
    pub fn target(&self) -> RepositoryResult<FieldTarget> {
        FieldTarget::resolve(&self.name, self.nested)
    }

    /// Check operator and value agree
    pub fn validate(&self) -> RepositoryResult<()> {
        validate_field_name(&self.name)?;
        match (self.operator, &self.value) {
            (FilterOperator::Like, FieldValue::String(_)) => Ok(()),
            (FilterOperator::Like, _) => Err(RepositoryError::validation_failed(format!(
                "LIKE on '{}' requires a string pattern",
                self.name
            ))),
            (FilterOperator::In, _) => Ok(()),
            (op, value) if value.is_list() && !op.is_unary() => {
                Err(RepositoryError::validation_failed(format!(
                    "operator {} on '{}' does not accept a list",
                    op, self.name
                )))
            }
            (FilterOperator::Equal | FilterOperator::NotEqual, FieldValue::Null) => Ok(()),
            (op, FieldValue::Null) if !op.is_unary() => {
                Err(RepositoryError::validation_failed(format!(
                    "operator {} on '{}' cannot compare against null",
                    op, self.name
                )))
            }
            (_, FieldValue::Float(n)) if !n.is_finite() => Err(
                RepositoryError::validation_failed(format!(
                    "value for '{}' must be a finite number",
                    self.name
                )),
            ),
            _ => Ok(()),
        }
    }
}
