//! Relational implementation of the repository port

use std::future::Future;

use sqlx::any::AnyRow;
use sqlx::AnyPool;
use sqlx::Row;

use super::compiler::{self, Statement};
use super::dialect::Dialect;
use super::pool::create_pool;
use super::tx::RelationalTx;
use crate::config::DatabaseConfig;
use crate::context::{AdapterId, Ctx, TxHandle};
use crate::error::{sanitize_url, DatabaseError, DatabaseErrorKind, DatabaseOperation, Error};
use crate::query::{validate_collection_name, QueryModel};
use crate::repository::{
    now_millis, FindOptions, NewDocument, Patch, QueryResult, RepositoryError,
    RepositoryOperation, RepositoryPort, RepositoryResult, StoredDocument, UpdateOptions,
};

/// Repository backed by a SQL database through the sqlx `Any` driver
///
/// Each collection is a table of `(id, owner_id, created_at, updated_at,
/// data)`. Clones share the pool and the adapter identity, so a transaction
/// opened through one clone can be joined through another.
#[derive(Debug, Clone)]
pub struct RelationalRepository {
    id: AdapterId,
    pool: AnyPool,
    dialect: Dialect,
}

impl RelationalRepository {
    /// Wrap an existing pool
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            id: AdapterId::next(),
            pool,
            dialect,
        }
    }

    /// Connect using the `database` configuration section
    pub async fn connect(config: &DatabaseConfig) -> crate::error::Result<Self> {
        let dialect = Dialect::from_url(&config.url).ok_or_else(|| {
            Error::Database(DatabaseError::new(
                DatabaseOperation::Connect,
                DatabaseErrorKind::Configuration,
                format!(
                    "unsupported database URL scheme in '{}'",
                    sanitize_url(&config.url)
                ),
            ))
        })?;
        let pool = create_pool(config).await?;
        Ok(Self::new(pool, dialect))
    }

    /// Identity used to tag transactions
    pub fn adapter_id(&self) -> AdapterId {
        self.id
    }

    /// SQL flavour in use
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Underlying pool
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Transaction of this adapter carried by `ctx`, if any
    fn active_tx<'c>(
        &self,
        ctx: &'c Ctx,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Option<&'c RelationalTx>> {
        match ctx.transaction() {
            None => Ok(None),
            Some(TxHandle::Relational(tx)) if tx.adapter_id() == self.id => Ok(Some(tx)),
            Some(other) => Err(other.foreign(operation)),
        }
    }

    async fn execute(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        stmt: Statement,
    ) -> RepositoryResult<u64> {
        let tx = self.active_tx(ctx, operation)?;
        tracing::debug!(
            operation = %operation,
            collection = collection,
            dialect = %self.dialect,
            in_transaction = tx.is_some(),
            sql = %stmt.sql,
            "Executing statement"
        );

        ctx.run(operation, async {
            let result = match tx {
                Some(tx) => {
                    let mut state = tx.lock().await;
                    let conn = state.connection(operation)?;
                    stmt.query().execute(conn).await
                }
                None => stmt.query().execute(&self.pool).await,
            };
            result
                .map(|done| done.rows_affected())
                .map_err(|e| backend_error(e, operation, collection))
        })
        .await
    }

    async fn fetch_all(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        stmt: Statement,
    ) -> RepositoryResult<Vec<AnyRow>> {
        let tx = self.active_tx(ctx, operation)?;
        tracing::debug!(
            operation = %operation,
            collection = collection,
            dialect = %self.dialect,
            in_transaction = tx.is_some(),
            sql = %stmt.sql,
            "Executing query"
        );

        ctx.run(operation, async {
            let result = match tx {
                Some(tx) => {
                    let mut state = tx.lock().await;
                    let conn = state.connection(operation)?;
                    stmt.query().fetch_all(conn).await
                }
                None => stmt.query().fetch_all(&self.pool).await,
            };
            result.map_err(|e| backend_error(e, operation, collection))
        })
        .await
    }
}

fn backend_error(err: sqlx::Error, operation: RepositoryOperation, collection: &str) -> RepositoryError {
    DatabaseError::from(err)
        .add_context(collection)
        .into_repository_error(operation)
}

fn decode_row(row: &AnyRow) -> RepositoryResult<StoredDocument> {
    let column = |e: sqlx::Error| {
        RepositoryError::from(DatabaseError::from(e)).with_operation(RepositoryOperation::Find)
    };
    let data: String = row.try_get("data").map_err(column)?;
    let data = match serde_json::from_str(&data)? {
        serde_json::Value::Object(map) => map,
        _ => {
            return Err(RepositoryError::serialization_error(
                RepositoryOperation::Find,
                "stored body is not a JSON object",
            ))
        }
    };
    Ok(StoredDocument {
        id: row.try_get("id").map_err(column)?,
        owner_id: row.try_get("owner_id").map_err(column)?,
        created_at: row.try_get("created_at").map_err(column)?,
        updated_at: row.try_get("updated_at").map_err(column)?,
        data,
    })
}

impl RepositoryPort for RelationalRepository {
    async fn save(&self, ctx: &Ctx, collection: &str, document: NewDocument) -> RepositoryResult<()> {
        validate_collection_name(collection)?;
        document.validate()?;
        let stmt = compiler::insert(self.dialect, collection, &document);
        self.execute(ctx, RepositoryOperation::Save, collection, stmt)
            .await
            .map_err(|e| {
                if e.is_already_exists() {
                    RepositoryError::already_exists(collection, document.id.as_str())
                } else {
                    e
                }
            })?;
        Ok(())
    }

    async fn find(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
        options: FindOptions,
    ) -> RepositoryResult<QueryResult> {
        validate_collection_name(collection)?;
        let stmt = compiler::select(self.dialect, collection, query, &options)?;
        let rows = self
            .fetch_all(ctx, RepositoryOperation::Find, collection, stmt)
            .await?;
        let documents = rows
            .iter()
            .map(decode_row)
            .collect::<RepositoryResult<Vec<_>>>()
            .map_err(|e| e.with_entity_type(collection))?;
        Ok(QueryResult::new(documents))
    }

    async fn count(&self, ctx: &Ctx, collection: &str, query: &QueryModel) -> RepositoryResult<u64> {
        validate_collection_name(collection)?;
        let stmt = compiler::count(self.dialect, collection, query)?;
        let rows = self
            .fetch_all(ctx, RepositoryOperation::Count, collection, stmt)
            .await?;
        let total: i64 = match rows.first() {
            Some(row) => row.try_get("total").map_err(|e| {
                backend_error(e, RepositoryOperation::Count, collection)
            })?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn update(
        &self,
        ctx: &Ctx,
        collection: &str,
        query: &QueryModel,
        patch: Patch,
        options: UpdateOptions,
    ) -> RepositoryResult<u64> {
        validate_collection_name(collection)?;
        let ops = patch.resolve()?;
        let stmt = compiler::update(
            self.dialect,
            collection,
            query,
            &ops,
            options.multi,
            now_millis(),
        )?;
        self.execute(ctx, RepositoryOperation::Update, collection, stmt)
            .await
    }

    async fn update_with_ownership(
        &self,
        ctx: &Ctx,
        collection: &str,
        id: &str,
        owner_id: &str,
        patch: Patch,
    ) -> RepositoryResult<()> {
        validate_collection_name(collection)?;
        let ops = patch.resolve()?;
        let stmt = compiler::update_owned(self.dialect, collection, id, owner_id, &ops, now_millis())?;
        let affected = self
            .execute(ctx, RepositoryOperation::UpdateWithOwnership, collection, stmt)
            .await?;
        if affected == 0 {
            return Err(RepositoryError::not_found(collection, id)
                .with_operation(RepositoryOperation::UpdateWithOwnership));
        }
        Ok(())
    }

    async fn delete_with_ownership(
        &self,
        ctx: &Ctx,
        collection: &str,
        id: &str,
        owner_id: &str,
    ) -> RepositoryResult<()> {
        validate_collection_name(collection)?;
        let stmt = compiler::delete_owned(self.dialect, collection, id, owner_id);
        let affected = self
            .execute(ctx, RepositoryOperation::DeleteWithOwnership, collection, stmt)
            .await?;
        if affected == 0 {
            return Err(RepositoryError::not_found(collection, id)
                .with_operation(RepositoryOperation::DeleteWithOwnership));
        }
        Ok(())
    }

    async fn delete(&self, ctx: &Ctx, collection: &str, query: &QueryModel) -> RepositoryResult<u64> {
        validate_collection_name(collection)?;
        let stmt = compiler::delete(self.dialect, collection, query)?;
        self.execute(ctx, RepositoryOperation::Delete, collection, stmt)
            .await
    }

    async fn with_transaction<T, F, Fut>(&self, ctx: &Ctx, f: F) -> RepositoryResult<T>
    where
        T: Send,
        F: FnOnce(Ctx) -> Fut + Send,
        Fut: Future<Output = RepositoryResult<T>> + Send,
    {
        if self
            .active_tx(ctx, RepositoryOperation::Transaction)?
            .is_some()
        {
            tracing::debug!("Joining transaction already carried by context");
            return f(ctx.clone()).await;
        }

        let tx = ctx
            .run(RepositoryOperation::Transaction, async {
                self.pool.begin().await.map_err(|e| {
                    RepositoryError::transaction_failed(format!(
                        "failed to begin transaction: {}",
                        DatabaseError::from(e)
                    ))
                })
            })
            .await?;
        let handle = RelationalTx::new(self.id, tx);
        let tx_ctx = ctx.with_transaction_handle(TxHandle::Relational(handle.clone()));

        match f(tx_ctx).await {
            Ok(value) => {
                handle.commit().await?;
                Ok(value)
            }
            Err(err) => match handle.rollback().await {
                Ok(()) => {
                    tracing::debug!(
                        operation = %err.operation,
                        kind = %err.kind,
                        "Transaction rolled back"
                    );
                    Err(err)
                }
                Err(rollback_err) => {
                    tracing::warn!(
                        "Rollback failed after {}: {}",
                        err.kind,
                        rollback_err.message
                    );
                    Err(RepositoryError::transaction_failed(rollback_err.message).with_cause(err))
                }
            },
        }
    }

    async fn ensure_collection(&self, ctx: &Ctx, collection: &str) -> RepositoryResult<()> {
        validate_collection_name(collection)?;
        for sql in compiler::create_collection(self.dialect, collection) {
            let stmt = Statement {
                sql,
                binds: Vec::new(),
            };
            self.execute(ctx, RepositoryOperation::EnsureCollection, collection, stmt)
                .await?;
        }
        tracing::info!(collection = collection, dialect = %self.dialect, "Collection ready");
        Ok(())
    }

    async fn ping(&self, ctx: &Ctx) -> RepositoryResult<()> {
        ctx.run(RepositoryOperation::Ping, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| DatabaseError::from(e).into_repository_error(RepositoryOperation::Ping))
        })
        .await
    }
}
