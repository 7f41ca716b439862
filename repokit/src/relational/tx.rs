//! Relational transaction handle

use std::sync::Arc;

use sqlx::AnyConnection;
use sqlx::{Any, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::context::AdapterId;
use crate::error::DatabaseError;
use crate::repository::{RepositoryError, RepositoryOperation, RepositoryResult};

/// Lifecycle of an open transaction
pub(crate) enum TxState {
    Active(Transaction<'static, Any>),
    Committed,
    RolledBack,
}

impl TxState {
    fn name(&self) -> &'static str {
        match self {
            Self::Active(_) => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }

    /// Connection of the open transaction
    ///
    /// # Errors
    ///
    /// `TransactionFailed` once the transaction has been committed or rolled back.
    pub(crate) fn connection(
        &mut self,
        operation: RepositoryOperation,
    ) -> RepositoryResult<&mut AnyConnection> {
        match self {
            Self::Active(tx) => Ok(&mut **tx),
            finished => Err(RepositoryError::transaction_failed(format!(
                "transaction already {}",
                finished.name()
            ))
            .with_operation(operation)),
        }
    }
}

/// Handle on an open sqlx transaction
///
/// Cloning shares the transaction. Statements lock it one at a time, so a
/// handle shared between tasks serializes instead of interleaving. Dropping
/// the last clone of an unfinished transaction rolls it back.
#[derive(Clone)]
pub struct RelationalTx {
    adapter: AdapterId,
    state: Arc<Mutex<TxState>>,
}

impl RelationalTx {
    pub(crate) fn new(adapter: AdapterId, tx: Transaction<'static, Any>) -> Self {
        Self {
            adapter,
            state: Arc::new(Mutex::new(TxState::Active(tx))),
        }
    }

    /// Adapter that opened the transaction
    pub fn adapter_id(&self) -> AdapterId {
        self.adapter
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().await
    }

    /// Whether the transaction is still open
    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, TxState::Active(_))
    }

    pub(crate) async fn commit(&self) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, TxState::Committed) {
            TxState::Active(tx) => tx.commit().await.map_err(|e| {
                *state = TxState::RolledBack;
                finish_failed("commit", e)
            }),
            finished => {
                let message = format!("cannot commit, transaction already {}", finished.name());
                *state = finished;
                Err(RepositoryError::transaction_failed(message))
            }
        }
    }

    pub(crate) async fn rollback(&self) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, TxState::RolledBack) {
            TxState::Active(tx) => tx.rollback().await.map_err(|e| finish_failed("rollback", e)),
            finished => {
                let message = format!("cannot roll back, transaction already {}", finished.name());
                *state = finished;
                Err(RepositoryError::transaction_failed(message))
            }
        }
    }
}

/// Failure to end a transaction, keeping the backend error as the cause
fn finish_failed(action: &str, err: sqlx::Error) -> RepositoryError {
    let cause = DatabaseError::from(err).into_repository_error(RepositoryOperation::Transaction);
    RepositoryError::transaction_failed(format!("{} failed: {}", action, cause.message))
        .with_cause(cause)
}

impl std::fmt::Debug for RelationalTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.try_lock() {
            Ok(state) => state.name(),
            Err(_) => "busy",
        };
        f.debug_struct("RelationalTx")
            .field("adapter", &self.adapter)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    #[test]
    fn test_rollback_failure_keeps_backend_cause() {
        let err = finish_failed("rollback", sqlx::Error::PoolClosed);
        assert_eq!(err.kind, RepositoryErrorKind::TransactionFailed);
        assert!(err.message.starts_with("rollback failed:"));

        let cause = err.cause.expect("backend error attached");
        assert_eq!(cause.kind, RepositoryErrorKind::ConnectionFailed);
        assert_eq!(cause.operation, RepositoryOperation::Transaction);
        assert!(cause.message.contains("closed"));
    }

    #[test]
    fn test_commit_failure_keeps_backend_cause() {
        let err = finish_failed("commit", sqlx::Error::PoolTimedOut);
        assert!(err.message.starts_with("commit failed:"));
        assert_eq!(
            err.cause.map(|cause| cause.kind),
            Some(RepositoryErrorKind::ConnectionFailed)
        );
    }
}
