//! Cursor-paginated reads over any repository
//!
//! [`Paginator`] ties the cursor codec, the keyset builder and a
//! [`RepositoryPort`] together: it decodes the request cursor, merges the
//! keyset predicate with the caller's base filters, fetches one row more than
//! the page size to learn whether another page exists, and re-encodes the
//! edge rows of the page into fresh cursors.
//!
//! # Example
//!
//! ```rust,ignore
//! use repokit::pagination::{PageRequest, Paginator};
//!
//! async fn list(repo: &impl RepositoryPort, ctx: &Ctx, request: PageRequest) -> RepositoryResult<Page<Post>> {
//!     let paginator = Paginator::from_config(&config.pagination);
//!     let base = QueryModel::from_conditions([Field::eq("status", "published")]);
//!     paginator
//!         .fetch_page(repo, ctx, "posts", &base, &request)
//!         .await?
//!         .decode_items()
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::PaginationConfig;
use crate::context::Ctx;
use crate::cursor::{CursorCodec, CursorData, CursorQueryBuilder, CursorValue, PageDirection, SortSpec};
use crate::query::{QueryModel, SortOrder};
use crate::repository::{
    FindOptions, RepositoryError, RepositoryPort, RepositoryResult, StoredDocument,
};

/// Page size used when a request has none
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page size a request may ask for
pub const MAX_PAGE_SIZE: u32 = 100;

/// Clamp a requested page size with the default bounds
///
/// ```rust
/// use repokit::pagination::validate_limit;
///
/// assert_eq!(validate_limit(0), 20);
/// assert_eq!(validate_limit(-3), 20);
/// assert_eq!(validate_limit(500), 100);
/// assert_eq!(validate_limit(35), 35);
/// ```
pub fn validate_limit(limit: i64) -> u32 {
    clamp_limit(Some(limit), DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE)
}

fn clamp_limit(limit: Option<i64>, default_limit: u32, max_limit: u32) -> u32 {
    match limit {
        None => default_limit,
        Some(n) if n <= 0 => default_limit,
        Some(n) if n > i64::from(max_limit) => max_limit,
        Some(n) => u32::try_from(n).unwrap_or(max_limit),
    }
}

/// Paginated request as received from a client
///
/// Deserializes from the query parameters `cursor`, `afterCursor`,
/// `beforeCursor`, `limit`, `sortField` and `direction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Forward cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Forward cursor, alternate spelling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_cursor: Option<String>,
    /// Backward cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_cursor: Option<String>,
    /// Requested page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Requested sort field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    /// Requested sort direction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<SortOrder>,
}

impl PageRequest {
    /// First page with default size and ordering
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.direction = Some(direction);
        self
    }

    /// Ask for the page after `token`
    #[must_use]
    pub fn after(mut self, token: impl Into<String>) -> Self {
        self.after_cursor = Some(token.into());
        self
    }

    /// Ask for the page before `token`
    #[must_use]
    pub fn before(mut self, token: impl Into<String>) -> Self {
        self.before_cursor = Some(token.into());
        self
    }

    /// Cursor token that governs the request and the direction it implies
    ///
    /// A forward cursor wins over a backward one when both are present.
    pub fn cursor_token(&self) -> (Option<&str>, PageDirection) {
        let non_empty: fn(&Option<String>) -> Option<&str> = |token| {
            token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
        };
        let forward = non_empty(&self.cursor).or_else(|| non_empty(&self.after_cursor));
        let backward = non_empty(&self.before_cursor);

        match (forward, backward) {
            (Some(token), Some(_)) => {
                tracing::warn!("Both forward and backward cursors supplied, using the forward cursor");
                (Some(token), PageDirection::Forward)
            }
            (Some(token), None) => (Some(token), PageDirection::Forward),
            (None, Some(token)) => (Some(token), PageDirection::Backward),
            (None, None) => (None, PageDirection::Forward),
        }
    }
}

/// One page of results with cursors to its neighbours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items in presentation order
    pub items: Vec<T>,
    /// Cursor for the following page, present iff `has_next`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Cursor for the preceding page, present iff `has_prev`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
    /// Whether a following page exists
    pub has_next: bool,
    /// Whether a preceding page exists
    pub has_prev: bool,
}

impl<T> Page<T> {
    /// Page with no items and no neighbours
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            prev_cursor: None,
            has_next: false,
            has_prev: false,
        }
    }

    /// Map each item to a new type, keeping the cursors
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            prev_cursor: self.prev_cursor,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Page<StoredDocument> {
    /// Decode every item into a caller type
    pub fn decode_items<T: DeserializeOwned>(self) -> RepositoryResult<Page<T>> {
        let items = self
            .items
            .iter()
            .map(StoredDocument::decode)
            .collect::<RepositoryResult<Vec<T>>>()?;
        Ok(Page {
            items,
            next_cursor: self.next_cursor,
            prev_cursor: self.prev_cursor,
            has_next: self.has_next,
            has_prev: self.has_prev,
        })
    }
}

#[cfg(feature = "http")]
impl<T: Serialize> axum::response::IntoResponse for Page<T> {
    fn into_response(self) -> axum::response::Response {
        (axum::http::StatusCode::OK, axum::Json(self)).into_response()
    }
}

/// Everything needed to run one page fetch
#[derive(Debug, Clone)]
pub(crate) struct PagePlan {
    pub query: QueryModel,
    pub options: FindOptions,
    pub sort: SortSpec,
    pub direction: PageDirection,
    pub has_cursor: bool,
    pub limit: u32,
}

/// Cursor paginator over a [`RepositoryPort`]
#[derive(Debug, Clone)]
pub struct Paginator {
    codec: CursorCodec,
    builder: CursorQueryBuilder,
    default_limit: u32,
    max_limit: u32,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(CursorCodec::new(), CursorQueryBuilder::default())
    }
}

impl Paginator {
    /// Paginator with the default page-size bounds
    pub fn new(codec: CursorCodec, builder: CursorQueryBuilder) -> Self {
        Self {
            codec,
            builder,
            default_limit: DEFAULT_PAGE_SIZE,
            max_limit: MAX_PAGE_SIZE,
        }
    }

    /// Paginator configured from the pagination section
    pub fn from_config(config: &PaginationConfig) -> Self {
        Self::new(
            CursorCodec::from_config(config),
            CursorQueryBuilder::from_config(config),
        )
        .with_limits(config.default_limit, config.max_limit)
    }

    /// Override the page-size bounds
    #[must_use]
    pub fn with_limits(mut self, default_limit: u32, max_limit: u32) -> Self {
        self.max_limit = max_limit.max(1);
        self.default_limit = default_limit.clamp(1, self.max_limit);
        self
    }

    pub fn codec(&self) -> &CursorCodec {
        &self.codec
    }

    pub fn builder(&self) -> &CursorQueryBuilder {
        &self.builder
    }

    /// Clamp a requested page size with this paginator's bounds
    pub fn limit_for(&self, requested: Option<i64>) -> u32 {
        clamp_limit(requested, self.default_limit, self.max_limit)
    }

    pub(crate) fn plan(&self, base: &QueryModel, request: &PageRequest) -> RepositoryResult<PagePlan> {
        let limit = self.limit_for(request.limit);
        let sort = self
            .builder
            .normalize_sort(request.sort_field.as_deref(), request.direction);
        let (token, direction) = request.cursor_token();
        let cursor = match token {
            Some(token) => self.codec.decode(token)?,
            None => None,
        };
        let keyset = self.builder.build(cursor.as_ref(), &sort, direction)?;

        Ok(PagePlan {
            query: base.clone().and(keyset),
            options: FindOptions::new()
                .with_sort(sort.fetch_order(direction))
                .with_limit(u64::from(limit) + 1),
            sort,
            direction,
            has_cursor: cursor.is_some(),
            limit,
        })
    }

    /// Fetch the page described by `request` from `collection`
    ///
    /// `base` holds the caller's own filters; the keyset predicate is added to
    /// it.
    ///
    /// # Errors
    ///
    /// `MalformedCursor` or `ValidationFailed` for bad cursors, and
    /// `ValidationFailed` when an item has no usable value for the sort field.
    pub async fn fetch_page<R: RepositoryPort>(
        &self,
        repo: &R,
        ctx: &Ctx,
        collection: &str,
        base: &QueryModel,
        request: &PageRequest,
    ) -> RepositoryResult<Page<StoredDocument>> {
        let plan = self.plan(base, request)?;
        tracing::debug!(
            collection = collection,
            sort_field = %plan.sort.field,
            order = %plan.sort.order,
            backward = plan.direction == PageDirection::Backward,
            limit = plan.limit,
            "Fetching page"
        );

        let result = repo
            .find(ctx, collection, &plan.query, plan.options.clone())
            .await?;
        self.assemble(result.into_documents(), &plan)
    }

    fn assemble(&self, mut items: Vec<StoredDocument>, plan: &PagePlan) -> RepositoryResult<Page<StoredDocument>> {
        let limit = plan.limit as usize;
        let has_more = items.len() > limit;
        items.truncate(limit);
        if items.is_empty() {
            return Ok(Page::empty());
        }

        let (has_next, has_prev) = match plan.direction {
            PageDirection::Forward => (has_more, plan.has_cursor),
            PageDirection::Backward => {
                items.reverse();
                (plan.has_cursor, has_more)
            }
        };

        let next_cursor = match (has_next, items.last()) {
            (true, Some(last)) => Some(self.cursor_for(last, &plan.sort)?),
            _ => None,
        };
        let prev_cursor = match (has_prev, items.first()) {
            (true, Some(first)) => Some(self.cursor_for(first, &plan.sort)?),
            _ => None,
        };

        Ok(Page {
            items,
            next_cursor,
            prev_cursor,
            has_next,
            has_prev,
        })
    }

    fn cursor_for(&self, document: &StoredDocument, sort: &SortSpec) -> RepositoryResult<String> {
        let value = document
            .field(&sort.field)
            .as_ref()
            .and_then(CursorValue::from_json)
            .ok_or_else(|| {
                RepositoryError::validation_failed(format!(
                    "document '{}' has no cursor value for sort field '{}'",
                    document.id, sort.field
                ))
            })?;
        let cursor = CursorData::new(document.id.clone(), value, sort.field.clone(), sort.order);
        self.codec.encode(Some(&cursor))
    }
}
