//! Keyset predicates from cursors
//!
//! Rows are totally ordered by `(sort_field, id)`. Given the edge row of the
//! current page, the neighbouring page is everything strictly after (forward)
//! or strictly before (backward) that row in the requested direction:
//!
//! | direction | forward | backward |
//! |-----------|---------|----------|
//! | desc      | `<`     | `>`      |
//! | asc       | `>`     | `<`      |
//!
//! The identifier tie-break makes the order total, so rows sharing a sort
//! value are neither skipped nor repeated across pages.

use std::collections::BTreeSet;

use super::CursorData;
use crate::config::PaginationConfig;
use crate::query::{Field, FieldTarget, FilterOperator, QueryModel, SortKey, SortOrder};
use crate::repository::{RepositoryError, RepositoryResult};

/// Name of the identifier field used for tie-breaking
pub(crate) const IDENTIFIER_FIELD: &str = "id";

/// Which neighbouring page a cursor asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageDirection {
    /// Rows after the cursor
    #[default]
    Forward,
    /// Rows before the cursor
    Backward,
}

/// Normalized ordering of a paginated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field the page is sorted by
    pub field: String,
    /// Direction the page is presented in
    pub order: SortOrder,
}

impl SortSpec {
    /// Create a new sort spec
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    /// Whether the sort field is the document identifier
    pub fn is_identifier(&self) -> bool {
        FieldTarget::resolve(&self.field, false)
            .map(|target| target.is_identifier())
            .unwrap_or(false)
    }

    /// ORDER BY terms for fetching in `direction`
    ///
    /// Backward pages are fetched in reverse and flipped afterwards, so the
    /// storage order is the opposite of the presentation order.
    pub fn fetch_order(&self, direction: PageDirection) -> Vec<SortKey> {
        let order = match direction {
            PageDirection::Forward => self.order,
            PageDirection::Backward => self.order.reversed(),
        };
        if self.is_identifier() {
            vec![SortKey::new(self.field.clone(), order)]
        } else {
            vec![
                SortKey::new(self.field.clone(), order),
                SortKey::new(IDENTIFIER_FIELD, order),
            ]
        }
    }
}

/// Builds the cursor predicate for a page request
///
/// # Example
///
/// ```rust
/// use repokit::cursor::{CursorData, CursorQueryBuilder, PageDirection};
/// use repokit::query::SortOrder;
///
/// let builder = CursorQueryBuilder::new("id", SortOrder::Desc)
///     .with_sortable_fields(["votes", "created_at"]);
/// let sort = builder.normalize_sort(Some("votes"), Some(SortOrder::Desc));
///
/// let cursor = CursorData::new("p_9", 10_i64, "votes", SortOrder::Desc);
/// let query = builder
///     .build(Some(&cursor), &sort, PageDirection::Forward)
///     .unwrap();
///
/// // votes < 10 OR (votes = 10 AND id < 'p_9')
/// assert_eq!(query.or_groups.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct CursorQueryBuilder {
    default_field: String,
    default_order: SortOrder,
    sortable: BTreeSet<String>,
}

impl Default for CursorQueryBuilder {
    fn default() -> Self {
        Self::new(IDENTIFIER_FIELD, SortOrder::Desc)
    }
}

impl CursorQueryBuilder {
    /// Builder whose allow-list holds only the identifier and `default_field`
    pub fn new(default_field: impl Into<String>, default_order: SortOrder) -> Self {
        let default_field = default_field.into();
        let mut sortable = BTreeSet::new();
        sortable.insert(IDENTIFIER_FIELD.to_string());
        sortable.insert(default_field.clone());
        Self {
            default_field,
            default_order,
            sortable,
        }
    }

    /// Builder configured from the pagination section
    pub fn from_config(config: &PaginationConfig) -> Self {
        Self::new(config.default_sort_field.clone(), config.default_direction)
            .with_sortable_fields(config.sortable_fields.iter().cloned())
    }

    /// Allow additional sort fields
    #[must_use]
    pub fn with_sortable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sortable.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Whether `field` may be sorted on
    pub fn is_sortable(&self, field: &str) -> bool {
        self.sortable.contains(field)
    }

    /// Resolve the requested ordering against the allow-list
    ///
    /// Missing or unknown fields fall back to the default field; the fallback
    /// is logged because it usually means a client bug.
    pub fn normalize_sort(&self, field: Option<&str>, order: Option<SortOrder>) -> SortSpec {
        let field = match field.map(str::trim).filter(|f| !f.is_empty()) {
            Some(requested) if self.is_sortable(requested) => requested.to_string(),
            Some(requested) => {
                tracing::warn!(
                    requested = requested,
                    fallback = %self.default_field,
                    "Sort field not allowed, falling back to default"
                );
                self.default_field.clone()
            }
            None => self.default_field.clone(),
        };
        SortSpec {
            field,
            order: order.unwrap_or(self.default_order),
        }
    }

    /// Comparison used against the cursor for a direction and page direction
    #[must_use]
    pub const fn comparison_operator(order: SortOrder, direction: PageDirection) -> FilterOperator {
        match (order, direction) {
            (SortOrder::Desc, PageDirection::Forward) => FilterOperator::LessThan,
            (SortOrder::Desc, PageDirection::Backward) => FilterOperator::GreaterThan,
            (SortOrder::Asc, PageDirection::Forward) => FilterOperator::GreaterThan,
            (SortOrder::Asc, PageDirection::Backward) => FilterOperator::LessThan,
        }
    }

    /// Keyset predicate selecting the page next to `cursor`
    ///
    /// Returns an empty model when there is no cursor. Base filters are the
    /// caller's; merge them with [`QueryModel::and`].
    ///
    /// # Errors
    ///
    /// `ValidationFailed` when the cursor is invalid or was issued for a
    /// different sort field or direction than `sort`.
    pub fn build(
        &self,
        cursor: Option<&CursorData>,
        sort: &SortSpec,
        direction: PageDirection,
    ) -> RepositoryResult<QueryModel> {
        let Some(cursor) = cursor else {
            return Ok(QueryModel::new());
        };
        cursor.validate()?;

        if cursor.sort_field != sort.field || cursor.direction != sort.order {
            return Err(RepositoryError::validation_failed(format!(
                "cursor was issued for {} {}, request sorts by {} {}",
                cursor.sort_field, cursor.direction, sort.field, sort.order
            )));
        }

        let op = Self::comparison_operator(sort.order, direction);
        let id_bound = Field::new(IDENTIFIER_FIELD, op, cursor.id.clone().into());

        if sort.is_identifier() {
            return Ok(QueryModel::from_conditions([id_bound]));
        }

        let value = cursor.value.to_field_value();
        Ok(QueryModel::new()
            .with_or_group(vec![Field::new(sort.field.clone(), op, value.clone())])
            .with_or_group(vec![
                Field::new(sort.field.clone(), FilterOperator::Equal, value),
                id_bound,
            ]))
    }
}
