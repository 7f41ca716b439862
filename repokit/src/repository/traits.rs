//! Repository port
//!
//! [`RepositoryPort`] is the only surface domain services see. It uses RPITIT
//! (Return Position Impl Trait In Traits) for async methods without
//! `async_trait`, and every future is `Send` so services can hold a port
//! inside spawned tasks.
//!
//! # Example
//!
//! ```rust,ignore
//! use repokit::context::Ctx;
//! use repokit::query::{Field, QueryModel};
//! use repokit::repository::{NewDocument, Patch, RepositoryPort, RepositoryResult};
//!
//! async fn publish<R: RepositoryPort>(repo: &R, ctx: &Ctx, post_id: &str, user: &str) -> RepositoryResult<()> {
//!     repo.with_transaction(ctx, |tx| async move {
//!         repo.update_with_ownership(&tx, "posts", post_id, user,
//!             Patch::new().set("status", "published".into())).await?;
//!         repo.increment_fields(&tx, "profiles", &QueryModel::by_id(user),
//!             vec![("published_count".into(), 1_i64.into())]).await?;
//!         Ok(())
//!     }).await
//! }
//! ```

use std::future::Future;

use serde_json::Value;

use super::documents::{NewDocument, QueryResult, SingleResult};
use super::error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
use super::options::{FindOptions, Patch, UpdateOptions};
use crate::context::Ctx;
use crate::query::{FieldValue, QueryModel};

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Backend-agnostic document repository
///
/// Implemented by the relational and the document adapters; service code is
/// written once against this trait.
pub trait RepositoryPort: Send + Sync {
    /// Insert a new document; never overwrites
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the collection already holds the identifier.
    fn save(
        &self,
        ctx: &Ctx,
        collection: &str,
        document: NewDocument,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Find documents matching `query`, ordered and windowed by `options`
    fn find(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
        options: FindOptions,
    ) -> impl Future<Output = RepositoryResult<QueryResult>> + Send;

    /// Find the first document matching `query`
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, distinguishable from backend failures.
    fn find_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
    ) -> impl Future<Output = RepositoryResult<SingleResult>> + Send {
        async move {
            let result = self
                .find(ctx, collection, query, FindOptions::new().with_limit(1))
                .await
                .map_err(|e| e.with_operation(RepositoryOperation::FindOne))?;
            result
                .into_iter()
                .next()
                .map(SingleResult::new)
                .ok_or_else(|| {
                    RepositoryError::new(
                        RepositoryOperation::FindOne,
                        RepositoryErrorKind::NotFound,
                        "No document matched the query",
                    )
                    .with_entity_type(collection)
                })
        }
    }

    /// Count documents matching `query`
    fn count(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Apply `patch` to the first (or every) match; returns the affected count
    ///
    /// Bumps `updated_at` on every touched document.
    fn update(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
        patch: Patch,
        options: UpdateOptions,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Overwrite fields on every match
    fn update_fields(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
        fields: Vec<(String, Value)>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        self.update(
            ctx,
            collection,
            query,
            Patch::set_fields(fields),
            UpdateOptions::multi(),
        )
    }

    /// Atomically add to numeric fields on every match
    ///
    /// The addition happens inside the store in a single statement, so
    /// concurrent increments never lose updates.
    fn increment_fields(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
        deltas: Vec<(String, FieldValue)>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        self.update(
            ctx,
            collection,
            query,
            Patch::increment_fields(deltas),
            UpdateOptions::multi(),
        )
    }

    /// Apply `patch` to document `id` only if `owner_id` owns it
    ///
    /// # Errors
    ///
    /// `NotFound` when the document is missing or owned by someone else; the
    /// two cases are deliberately indistinguishable.
    fn update_with_ownership(
        &self,
        ctx: &Ctx,
        collection: &str,
        id: &str,
        owner_id: &str,
        patch: Patch,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Delete document `id` only if `owner_id` owns it
    ///
    /// # Errors
    ///
    /// `NotFound` when the document is missing or owned by someone else.
    fn delete_with_ownership(
        &self,
        ctx: &Ctx,
        collection: &str,
        id: &str,
        owner_id: &str,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Delete every match; returns the affected count
    fn delete(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Run `f` as one unit of work
    ///
    /// Commits when `f` returns `Ok` and rolls back when it returns `Err`,
    /// handing the original error back. If the rollback itself fails the
    /// result is `TransactionFailed` with the original error as its cause.
    /// When `ctx` already carries a transaction of this adapter, `f` joins it
    /// and the outer call decides commit or rollback.
    fn with_transaction<T, F, Fut>(
        &self,
        ctx: &Ctx,
        f: F,
    ) -> impl Future<Output = RepositoryResult<T>> + Send
    where
        T: Send,
        F: FnOnce(Ctx) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<T>> + Send;

    /// Prepare storage for a collection (table, indexes); idempotent
    fn ensure_collection(
        &self,
        ctx: &Ctx,
        collection: &str,
    ) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Check the backend is reachable
    fn ping(&self, ctx: &Ctx) -> impl Future<Output = RepositoryResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::StoredDocument;
    use std::sync::Mutex;

    #[test]
    fn test_repository_result_type() {
        let ok_result: RepositoryResult<i32> = Ok(42);
        assert!(ok_result.is_ok());

        let err_result: RepositoryResult<i32> = Err(RepositoryError::not_found("posts", "123"));
        assert!(err_result.is_err());
    }

    /// In-memory port that records the last update call
    #[derive(Default)]
    struct MockRepository {
        documents: Vec<StoredDocument>,
        last_update: Mutex<Option<(Patch, UpdateOptions)>>,
    }

    impl RepositoryPort for MockRepository {
        async fn save(&self, _ctx: &Ctx, _collection: &str, _document: NewDocument) -> RepositoryResult<()> {
            Ok(())
        }

        async fn find(
            &self,
            _ctx: &Ctx,
            _collection: &str,
            _query: &QueryModel,
            options: FindOptions,
        ) -> RepositoryResult<QueryResult> {
            let limit = options.limit.map_or(usize::MAX, |l| l as usize);
            Ok(QueryResult::new(
                self.documents.iter().take(limit).cloned().collect(),
            ))
        }

        async fn count(&self, _ctx: &Ctx, _collection: &str, _query: &QueryModel) -> RepositoryResult<u64> {
            Ok(self.documents.len() as u64)
        }

        async fn update(
            &self,
            _ctx: &Ctx,
            _collection: &str,
            _query: &QueryModel,
            patch: Patch,
            options: UpdateOptions,
        ) -> RepositoryResult<u64> {
            patch.validate()?;
            if let Ok(mut last) = self.last_update.lock() {
                *last = Some((patch, options));
            }
            Ok(1)
        }

        async fn update_with_ownership(
            &self,
            _ctx: &Ctx,
            collection: &str,
            id: &str,
            _owner_id: &str,
            _patch: Patch,
        ) -> RepositoryResult<()> {
            Err(RepositoryError::not_found(collection, id))
        }

        async fn delete_with_ownership(
            &self,
            _ctx: &Ctx,
            collection: &str,
            id: &str,
            _owner_id: &str,
        ) -> RepositoryResult<()> {
            Err(RepositoryError::not_found(collection, id))
        }

        async fn delete(&self, _ctx: &Ctx, _collection: &str, _query: &QueryModel) -> RepositoryResult<u64> {
            Ok(0)
        }

        async fn with_transaction<T, F, Fut>(&self, ctx: &Ctx, f: F) -> RepositoryResult<T>
        where
            T: Send,
            F: FnOnce(Ctx) -> Fut + Send,
            Fut: Future<Output = RepositoryResult<T>> + Send,
        {
            f(ctx.clone()).await
        }

        async fn ensure_collection(&self, _ctx: &Ctx, _collection: &str) -> RepositoryResult<()> {
            Ok(())
        }

        async fn ping(&self, _ctx: &Ctx) -> RepositoryResult<()> {
            Ok(())
        }
    }

    fn doc(id: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            owner_id: "u_1".to_string(),
            created_at: 0,
            updated_at: 0,
            data: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_find_one_default_returns_first() {
        let repo = MockRepository {
            documents: vec![doc("a"), doc("b")],
            ..MockRepository::default()
        };
        let single = repo
            .find_one(&Ctx::new(), "posts", &QueryModel::new())
            .await
            .unwrap();
        assert_eq!(single.document().id, "a");
    }

    #[tokio::test]
    async fn test_find_one_default_not_found() {
        let repo = MockRepository::default();
        let err = repo
            .find_one(&Ctx::new(), "posts", &QueryModel::by_id("zzz"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, RepositoryOperation::FindOne);
        assert_eq!(err.entity_type.as_deref(), Some("posts"));
    }

    #[tokio::test]
    async fn test_convenience_updates_apply_to_all_matches() {
        let repo = MockRepository::default();
        let ctx = Ctx::new();

        repo.increment_fields(&ctx, "posts", &QueryModel::new(), vec![("votes".into(), 1_i64.into())])
            .await
            .unwrap();
        let (patch, options) = repo.last_update.lock().unwrap().clone().unwrap();
        assert!(options.multi);
        assert_eq!(patch.increment.len(), 1);

        repo.update_fields(&ctx, "posts", &QueryModel::new(), vec![("title".into(), "t".into())])
            .await
            .unwrap();
        let (patch, _) = repo.last_update.lock().unwrap().clone().unwrap();
        assert_eq!(patch.set.len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_passes_context() {
        let repo = MockRepository::default();
        let value = repo
            .with_transaction(&Ctx::new(), |tx| async move {
                assert!(tx.transaction().is_none());
                Ok(5)
            })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }
}
