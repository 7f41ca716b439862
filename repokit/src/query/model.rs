//! Declarative query model
//!
//! The predicate a [`QueryModel`] describes is
//! `AND(conditions) AND OR(AND(group) for group in or_groups)`. The OR part is
//! omitted when there are no groups. Each backend adapter compiles the model
//! into its own native form; the model never contains backend syntax.

use super::field::Field;
use crate::repository::RepositoryResult;

/// Conjunctive conditions plus a disjunction of conjunctive groups
///
/// # Example
///
/// ```rust
/// use repokit::query::{Field, QueryModel};
///
/// // status = 'published' AND (votes > 10 OR (votes = 10 AND id > 'p_9'))
/// let query = QueryModel::new()
///     .with_condition(Field::eq("status", "published"))
///     .with_or_group(vec![Field::gt("votes", 10_i64)])
///     .with_or_group(vec![Field::eq("votes", 10_i64), Field::gt("id", "p_9")]);
///
/// assert_eq!(query.conditions.len(), 1);
/// assert_eq!(query.or_groups.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryModel {
    /// Conditions that must all hold
    pub conditions: Vec<Field>,
    /// Groups of which at least one must hold; each group is AND-ed
    pub or_groups: Vec<Vec<Field>>,
}

impl QueryModel {
    /// Empty model matching every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Model from a list of AND-ed conditions
    pub fn from_conditions(conditions: impl IntoIterator<Item = Field>) -> Self {
        Self {
            conditions: conditions.into_iter().collect(),
            or_groups: Vec::new(),
        }
    }

    /// Match a single document by identifier
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::from_conditions([Field::eq("id", id.into())])
    }

    /// Add an AND-ed condition
    #[must_use]
    pub fn with_condition(mut self, field: Field) -> Self {
        self.conditions.push(field);
        self
    }

    /// Add an OR-ed group
    #[must_use]
    pub fn with_or_group(mut self, group: Vec<Field>) -> Self {
        self.or_groups.push(group);
        self
    }

    /// Whether the model places no restriction at all
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.or_groups.is_empty()
    }

    /// Conjoin two models, keeping the result in the same normal form
    ///
    /// When both sides carry OR groups they are distributed:
    /// `(a OR b) AND (c OR d)` becomes `(a AND c) OR (a AND d) OR (b AND c) OR (b AND d)`.
    ///
    /// ```rust
    /// use repokit::query::{Field, QueryModel};
    ///
    /// let visible = QueryModel::new()
    ///     .with_or_group(vec![Field::eq("status", "published")])
    ///     .with_or_group(vec![Field::eq("owner_id", "u_1")]);
    /// let after = QueryModel::new()
    ///     .with_or_group(vec![Field::lt("votes", 5_i64)])
    ///     .with_or_group(vec![Field::eq("votes", 5_i64), Field::lt("id", "p_3")]);
    ///
    /// let merged = visible.and(after);
    /// assert_eq!(merged.or_groups.len(), 4);
    /// ```
    #[must_use]
    pub fn and(mut self, other: QueryModel) -> Self {
        self.conditions.extend(other.conditions);
        self.or_groups = match (self.or_groups.is_empty(), other.or_groups.is_empty()) {
            (_, true) => self.or_groups,
            (true, false) => other.or_groups,
            (false, false) => {
                let mut product = Vec::with_capacity(self.or_groups.len() * other.or_groups.len());
                for left in &self.or_groups {
                    for right in &other.or_groups {
                        let mut group = left.clone();
                        group.extend(right.iter().cloned());
                        product.push(group);
                    }
                }
                product
            }
        };
        self
    }

    /// Every field in the model, conditions first
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.conditions
            .iter()
            .chain(self.or_groups.iter().flatten())
    }

    /// Validate every field name and operator/value pairing
    pub fn validate(&self) -> RepositoryResult<()> {
        self.fields().try_for_each(Field::validate)
    }
}

impl From<Vec<Field>> for QueryModel {
    fn from(conditions: Vec<Field>) -> Self {
        Self::from_conditions(conditions)
    }
}
