//! # repokit
//!
//! Backend-agnostic storage access with stable cursor pagination.
//!
//! Service code is written once against [`repository::RepositoryPort`] and
//! runs unchanged on a relational store (PostgreSQL or SQLite through sqlx)
//! or a document store (SurrealDB).
//!
//! ## Features
//!
//! - **Declarative queries**: [`query::QueryModel`] of AND-ed conditions and OR-ed groups,
//!   compiled by each adapter to parameterized native predicates
//! - **Cursor pagination**: opaque, optionally signed tokens ([`cursor::CursorCodec`]),
//!   keyset predicates with an identifier tie-break ([`cursor::CursorQueryBuilder`]) and
//!   a [`pagination::Paginator`] that assembles pages
//! - **Ownership-scoped mutations**: update and delete only what the caller owns,
//!   in a single statement
//! - **Transactions**: propagated through [`context::Ctx`], joined by nested calls
//! - **Deadlines and cancellation**: every backend round-trip honours the context
//!
//! ## Example
//!
//! ```rust,no_run
//! use repokit::prelude::*;
//!
//! # async fn example() -> repokit::error::Result<()> {
//! let config = Config::load()?;
//! init_tracing(&config)?;
//!
//! let repo = RelationalRepository::connect(&DatabaseConfig::new("sqlite::memory:")).await?;
//! let ctx = Ctx::new();
//! repo.ensure_collection(&ctx, "posts").await?;
//!
//! let paginator = Paginator::from_config(&config.pagination);
//! let page = paginator
//!     .fetch_page(&repo, &ctx, "posts", &QueryModel::new(), &PageRequest::new().with_limit(10))
//!     .await?;
//! println!("{} posts, more: {}", page.len(), page.has_next);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod observability;
pub mod pagination;
pub mod query;
pub mod repository;

#[cfg(feature = "relational")]
pub mod relational;

#[cfg(feature = "document")]
pub mod document;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, PaginationConfig, SurrealDbConfig};

    pub use crate::context::{Ctx, TxHandle};
    pub use crate::cursor::{CursorCodec, CursorData, CursorQueryBuilder, PageDirection, SortSpec};
    pub use crate::error::{Error, Result};

    #[cfg(any(feature = "relational", feature = "document"))]
    pub use crate::error::{DatabaseError, DatabaseErrorKind, DatabaseOperation};

    pub use crate::observability::init_tracing;
    pub use crate::pagination::{validate_limit, Page, PageRequest, Paginator};
    pub use crate::query::{Field, FieldValue, FilterOperator, QueryModel, SortKey, SortOrder};
    pub use crate::repository::{
        FindOptions, NewDocument, Patch, QueryResult, RepositoryError, RepositoryErrorKind,
        RepositoryPort, RepositoryResult, SingleResult, StoredDocument, UpdateOptions,
    };

    #[cfg(feature = "relational")]
    pub use crate::relational::{Dialect, RelationalRepository};

    #[cfg(feature = "document")]
    pub use crate::document::DocumentRepository;
}
