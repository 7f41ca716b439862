//! Document (SurrealDB) implementation of the repository port

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::client::{create_client, SurrealClient};
use super::compiler::{self, Script};
use super::tx::DocumentTx;
use crate::config::SurrealDbConfig;
use crate::context::{AdapterId, Ctx, TxHandle};
use crate::error::DatabaseError;
use crate::query::{validate_collection_name, QueryModel};
use crate::repository::{
    now_millis, FindOptions, NewDocument, Patch, QueryResult, RepositoryError,
    RepositoryErrorKind, RepositoryOperation, RepositoryPort, RepositoryResult, StoredDocument,
    UpdateOptions,
};

/// Attempts after the first when a standalone write hits a write conflict
const CONFLICT_RETRIES: u32 = 8;

/// Delay before the first conflict retry, doubled on each attempt
const CONFLICT_BACKOFF: Duration = Duration::from_millis(5);

/// Shape of a stored record once the record id is omitted
#[derive(Debug, Deserialize)]
struct DocumentRow {
    key: String,
    owner_id: String,
    created_at: i64,
    updated_at: i64,
    #[serde(default)]
    data: Map<String, Value>,
}

impl From<DocumentRow> for StoredDocument {
    fn from(row: DocumentRow) -> Self {
        StoredDocument {
            id: row.key,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            data: row.data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: i64,
}

/// Repository backed by SurrealDB
///
/// Each collection is a schemaless table whose records carry the envelope
/// fields next to a `data` object. Clones share the client and the adapter
/// identity.
#[derive(Clone)]
pub struct DocumentRepository {
    id: AdapterId,
    client: SurrealClient,
    scripts: Arc<AtomicU64>,
}

impl DocumentRepository {
    /// Wrap a connected client
    pub fn new(client: SurrealClient) -> Self {
        Self {
            id: AdapterId::next(),
            client,
            scripts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect using the `surrealdb` configuration section
    pub async fn connect(config: &SurrealDbConfig) -> crate::error::Result<Self> {
        Ok(Self::new(create_client(config).await?))
    }

    /// Identity used to tag transactions
    pub fn adapter_id(&self) -> AdapterId {
        self.id
    }

    /// Underlying client
    pub fn client(&self) -> &SurrealClient {
        &self.client
    }

    /// Variable prefix unique to one script of this adapter
    fn prefix(&self) -> String {
        format!("s{}", self.scripts.fetch_add(1, Ordering::Relaxed))
    }

    fn active_tx<'c>(
        &self,
        ctx: &'c Ctx,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Option<&'c DocumentTx>> {
        match ctx.transaction() {
            None => Ok(None),
            Some(TxHandle::Document(tx)) if tx.adapter_id() == self.id => Ok(Some(tx)),
            Some(other) => Err(other.foreign(operation)),
        }
    }

    async fn run_script(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        script: Script,
    ) -> RepositoryResult<surrealdb::Response> {
        tracing::debug!(
            operation = %operation,
            collection = collection,
            sql = %script.sql,
            "Executing script"
        );

        ctx.run(operation, async {
            let response = self
                .client
                .query(script.sql)
                .bind(script.vars)
                .await
                .map_err(|e| backend_error(e, operation, collection))?;
            response
                .check()
                .map_err(|e| backend_error(e, operation, collection))
        })
        .await
    }

    /// Read under `ctx`; an open transaction only has to be active
    async fn read(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        script: Script,
    ) -> RepositoryResult<surrealdb::Response> {
        if let Some(tx) = self.active_tx(ctx, operation)? {
            tx.ensure_active(operation).await?;
        }
        self.run_script(ctx, operation, collection, script).await
    }

    /// Write under `ctx`
    ///
    /// Inside a transaction the write is rehearsed on top of the buffered
    /// writes first, so the caller sees its real outcome before it is buffered.
    async fn write(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        script: Script,
    ) -> RepositoryResult<WriteOutcome> {
        match self.active_tx(ctx, operation)? {
            Some(tx) => {
                let pending = tx.pending(operation).await?;
                let affected = self
                    .rehearse(ctx, operation, collection, pending, script.clone())
                    .await?;
                tracing::debug!(
                    operation = %operation,
                    collection = collection,
                    affected = affected,
                    "Buffering write into transaction"
                );
                tx.push(operation, script).await?;
                Ok(WriteOutcome::Buffered(affected))
            }
            None => self
                .run_with_conflict_retry(ctx, operation, collection, script)
                .await
                .map(WriteOutcome::Applied),
        }
    }

    /// Run a standalone write, retrying it while the store reports a write conflict
    async fn run_with_conflict_retry(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        script: Script,
    ) -> RepositoryResult<surrealdb::Response> {
        let mut attempt = 0;
        loop {
            match self
                .run_script(ctx, operation, collection, script.clone())
                .await
            {
                Err(err)
                    if err.kind == RepositoryErrorKind::TransactionFailed
                        && attempt < CONFLICT_RETRIES =>
                {
                    attempt += 1;
                    let delay = CONFLICT_BACKOFF * 2_u32.pow(attempt.saturating_sub(1));
                    tracing::warn!(
                        operation = %operation,
                        collection = collection,
                        attempt = attempt,
                        "Write conflict, retrying in {:?}: {}",
                        delay,
                        err.message
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Replay the buffered writes plus `script` in an aborted transaction
    ///
    /// Returns how many records `script` changes; any error it raises is
    /// returned as if the write had run standalone.
    async fn rehearse(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        pending: Vec<Script>,
        script: Script,
    ) -> RepositoryResult<u64> {
        let rehearsal = compiler::rehearsal(pending, script);
        let mut response = ctx
            .run(operation, async {
                self.client
                    .query(rehearsal.sql)
                    .bind(rehearsal.vars)
                    .await
                    .map_err(|e| backend_error(e, operation, collection))
            })
            .await?;

        let Some(err) = primary_error(response.take_errors()) else {
            return Err(RepositoryError::transaction_failed(
                "rehearsal of a buffered write was not aborted",
            )
            .with_operation(operation));
        };
        match compiler::rehearsed_count(&err.to_string()) {
            Some(affected) => Ok(affected),
            None => Err(backend_error(err, operation, collection)),
        }
    }

    /// Number of records the script reported as changed
    async fn write_counted(
        &self,
        ctx: &Ctx,
        operation: RepositoryOperation,
        collection: &str,
        script: Script,
    ) -> RepositoryResult<u64> {
        let mut response = match self.write(ctx, operation, collection, script).await? {
            WriteOutcome::Buffered(affected) => return Ok(affected),
            WriteOutcome::Applied(response) => response,
        };
        let last = response.num_statements().saturating_sub(1);
        let changed: Option<i64> = response
            .take(last)
            .map_err(|e| backend_error(e, operation, collection))?;
        Ok(changed.and_then(|n| u64::try_from(n).ok()).unwrap_or(0))
    }

    async fn commit(&self, scripts: Vec<Script>) -> RepositoryResult<()> {
        let writes = scripts.len();
        let script = compiler::transaction(scripts);
        tracing::debug!(writes = writes, sql = %script.sql, "Committing transaction");

        let mut response = self
            .client
            .query(script.sql)
            .bind(script.vars)
            .await
            .map_err(transaction_error)?;

        match primary_error(response.take_errors()) {
            None => Ok(()),
            Some(err) => Err(transaction_error(err)),
        }
    }
}

/// Result of a write issued under a context
enum WriteOutcome {
    /// Ran against the store
    Applied(surrealdb::Response),
    /// Accepted into the open transaction; carries the rehearsed change count
    Buffered(u64),
}

/// Error of the statement that failed a multi-statement script
///
/// Statements after the failing one only report the aborted transaction.
fn primary_error(errors: HashMap<usize, surrealdb::Error>) -> Option<surrealdb::Error> {
    let mut errors: Vec<(usize, surrealdb::Error)> = errors.into_iter().collect();
    if errors.is_empty() {
        return None;
    }
    errors.sort_by_key(|(index, _)| *index);
    let primary = errors
        .iter()
        .position(|(_, e)| {
            let msg = e.to_string();
            !msg.contains("failed transaction") && !msg.contains("cancelled transaction")
        })
        .unwrap_or(0);
    Some(errors.swap_remove(primary).1)
}

impl std::fmt::Debug for DocumentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRepository")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn backend_error(
    err: surrealdb::Error,
    operation: RepositoryOperation,
    collection: &str,
) -> RepositoryError {
    DatabaseError::from(err)
        .add_context(collection)
        .into_repository_error(operation)
}

fn transaction_error(err: surrealdb::Error) -> RepositoryError {
    DatabaseError::from(err).into_repository_error(RepositoryOperation::Transaction)
}

impl RepositoryPort for DocumentRepository {
    async fn save(&self, ctx: &Ctx, collection: &str, document: NewDocument) -> RepositoryResult<()> {
        validate_collection_name(collection)?;
        document.validate()?;
        let script = compiler::insert(&self.prefix(), collection, &document);
        self.write(ctx, RepositoryOperation::Save, collection, script)
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
        let script = compiler::select(&self.prefix(), collection, query, &options)?;
        let mut response = self
            .read(ctx, RepositoryOperation::Find, collection, script)
            .await?;
        let rows: Vec<DocumentRow> = response
            .take(0)
            .map_err(|e| backend_error(e, RepositoryOperation::Find, collection))?;
        Ok(QueryResult::new(rows.into_iter().map(StoredDocument::from).collect()))
    }

    async fn count(&self, ctx: &Ctx, collection: &str, query: &QueryModel) -> RepositoryResult<u64> {
        validate_collection_name(collection)?;
        let script = compiler::count(&self.prefix(), collection, query)?;
        let mut response = self
            .read(ctx, RepositoryOperation::Count, collection, script)
            .await?;
        let rows: Vec<CountRow> = response
            .take(0)
            .map_err(|e| backend_error(e, RepositoryOperation::Count, collection))?;
        Ok(rows
            .first()
            .and_then(|row| u64::try_from(row.total).ok())
            .unwrap_or(0))
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
        let script = compiler::update(
            &self.prefix(),
            collection,
            query,
            &ops,
            options.multi,
            now_millis(),
        )?;
        self.write_counted(ctx, RepositoryOperation::Update, collection, script)
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
        let script =
            compiler::update_owned(&self.prefix(), collection, id, owner_id, &ops, now_millis());
        match self
            .write(ctx, RepositoryOperation::UpdateWithOwnership, collection, script)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(RepositoryError::not_found(collection, id)
                .with_operation(RepositoryOperation::UpdateWithOwnership)),
            Err(e) => Err(e),
        }
    }

    async fn delete_with_ownership(
        &self,
        ctx: &Ctx,
        collection: &str,
        id: &str,
        owner_id: &str,
    ) -> RepositoryResult<()> {
        validate_collection_name(collection)?;
        let script = compiler::delete_owned(&self.prefix(), collection, id, owner_id);
        match self
            .write(ctx, RepositoryOperation::DeleteWithOwnership, collection, script)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(RepositoryError::not_found(collection, id)
                .with_operation(RepositoryOperation::DeleteWithOwnership)),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, ctx: &Ctx, collection: &str, query: &QueryModel) -> RepositoryResult<u64> {
        validate_collection_name(collection)?;
        let script = compiler::delete(&self.prefix(), collection, query)?;
        self.write_counted(ctx, RepositoryOperation::Delete, collection, script)
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
        if ctx.is_cancelled() {
            return Err(RepositoryError::cancelled(RepositoryOperation::Transaction));
        }

        let handle = DocumentTx::new(self.id);
        let tx_ctx = ctx.with_transaction_handle(TxHandle::Document(handle.clone()));

        match f(tx_ctx).await {
            Ok(value) => {
                let scripts = handle.take_for_commit().await?;
                if scripts.is_empty() {
                    return Ok(value);
                }
                match ctx
                    .run(RepositoryOperation::Transaction, self.commit(scripts))
                    .await
                {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        handle.mark_failed().await;
                        tracing::debug!(kind = %err.kind, "Transaction commit rejected");
                        Err(err)
                    }
                }
            }
            Err(err) => match handle.rollback().await {
                Ok(discarded) => {
                    tracing::debug!(
                        operation = %err.operation,
                        kind = %err.kind,
                        discarded = discarded,
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
        let script = compiler::define_collection(collection);
        self.write(ctx, RepositoryOperation::EnsureCollection, collection, script)
            .await?;
        tracing::info!(collection = collection, backend = "surrealdb", "Collection ready");
        Ok(())
    }

    async fn ping(&self, ctx: &Ctx) -> RepositoryResult<()> {
        ctx.run(RepositoryOperation::Ping, async {
            self.client
                .health()
                .await
                .map_err(|e| DatabaseError::from(e).into_repository_error(RepositoryOperation::Ping))
        })
        .await
    }
}
