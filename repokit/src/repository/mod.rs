//! Backend-agnostic document repository
//!
//! This module defines the port domain services program against and the
//! shapes flowing through it.
//!
//! # Features
//!
//! - **Port**: [`RepositoryPort`] for save, find, count, update, delete and transactions
//! - **Ownership**: [`RepositoryPort::update_with_ownership`] and
//!   [`RepositoryPort::delete_with_ownership`] filter by owner in the same statement
//! - **Patches**: [`Patch`] for set, atomic increment and unset on body paths
//! - **Errors**: [`RepositoryError`] with operation, kind and entity context
//!
//! # Example
//!
//! ```rust,ignore
//! use repokit::context::Ctx;
//! use repokit::query::{Field, QueryModel, SortKey};
//! use repokit::repository::{FindOptions, NewDocument, RepositoryPort};
//!
//! async fn recent_posts<R: RepositoryPort>(repo: &R, owner: &str) -> repokit::repository::RepositoryResult<usize> {
//!     let ctx = Ctx::new();
//!     repo.save(&ctx, "posts", NewDocument::from_serializable("p_1", owner, &post)?).await?;
//!
//!     let query = QueryModel::from_conditions([Field::eq("owner_id", owner)]);
//!     let options = FindOptions::new().sort_by(SortKey::desc("created_at")).with_limit(10);
//!     Ok(repo.find(&ctx, "posts", &query, options).await?.len())
//! }
//! ```

mod documents;
mod error;
mod options;
mod traits;

#[cfg(all(test, any(feature = "relational", feature = "document")))]
pub(crate) mod scenarios;

pub use documents::{
    new_document_id, now_millis, NewDocument, QueryResult, SingleResult, StoredDocument,
};
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use options::{FindOptions, Patch, UpdateOptions};
pub(crate) use options::PatchOp;
pub use traits::{RepositoryPort, RepositoryResult};
