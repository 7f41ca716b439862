//! Document transaction handle
//!
//! SurrealDB over the `Any` engine has no interactive transaction that
//! survives between requests, so writes issued inside a transaction are
//! buffered and sent as one `BEGIN ... COMMIT` script when the closure
//! succeeds. Each write is rehearsed against the buffer before it is
//! accepted. Reads run immediately against committed data.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::compiler::Script;
use crate::context::AdapterId;
use crate::repository::{RepositoryError, RepositoryOperation, RepositoryResult};

enum DocTxState {
    Active(Vec<Script>),
    Committed,
    RolledBack,
}

impl DocTxState {
    fn name(&self) -> &'static str {
        match self {
            Self::Active(_) => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }

    fn finished(&self, operation: RepositoryOperation) -> RepositoryError {
        RepositoryError::transaction_failed(format!("transaction already {}", self.name()))
            .with_operation(operation)
    }
}

/// Handle on a buffered document transaction
///
/// Cloning shares the buffer.
#[derive(Clone)]
pub struct DocumentTx {
    adapter: AdapterId,
    state: Arc<Mutex<DocTxState>>,
}

impl DocumentTx {
    pub(crate) fn new(adapter: AdapterId) -> Self {
        Self {
            adapter,
            state: Arc::new(Mutex::new(DocTxState::Active(Vec::new()))),
        }
    }

    /// Adapter that opened the transaction
    pub fn adapter_id(&self) -> AdapterId {
        self.adapter
    }

    /// Whether the transaction is still open
    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, DocTxState::Active(_))
    }

    /// Number of writes waiting for commit
    pub async fn pending_writes(&self) -> usize {
        match &*self.state.lock().await {
            DocTxState::Active(scripts) => scripts.len(),
            _ => 0,
        }
    }

    pub(crate) async fn ensure_active(&self, operation: RepositoryOperation) -> RepositoryResult<()> {
        match &*self.state.lock().await {
            DocTxState::Active(_) => Ok(()),
            finished => Err(finished.finished(operation)),
        }
    }

    /// Copy of the writes buffered so far
    pub(crate) async fn pending(&self, operation: RepositoryOperation) -> RepositoryResult<Vec<Script>> {
        match &*self.state.lock().await {
            DocTxState::Active(scripts) => Ok(scripts.clone()),
            finished => Err(finished.finished(operation)),
        }
    }

    pub(crate) async fn push(&self, operation: RepositoryOperation, script: Script) -> RepositoryResult<()> {
        match &mut *self.state.lock().await {
            DocTxState::Active(scripts) => {
                scripts.push(script);
                Ok(())
            }
            finished => Err(finished.finished(operation)),
        }
    }

    /// Close the buffer for commit and hand back the writes
    pub(crate) async fn take_for_commit(&self) -> RepositoryResult<Vec<Script>> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, DocTxState::Committed) {
            DocTxState::Active(scripts) => Ok(scripts),
            finished => {
                let err = RepositoryError::transaction_failed(format!(
                    "cannot commit, transaction already {}",
                    finished.name()
                ));
                *state = finished;
                Err(err)
            }
        }
    }

    /// Record that the commit script was rejected
    pub(crate) async fn mark_failed(&self) {
        *self.state.lock().await = DocTxState::RolledBack;
    }

    /// Discard buffered writes, returning how many were dropped
    pub(crate) async fn rollback(&self) -> RepositoryResult<usize> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, DocTxState::RolledBack) {
            DocTxState::Active(scripts) => Ok(scripts.len()),
            finished => {
                let err = RepositoryError::transaction_failed(format!(
                    "cannot roll back, transaction already {}",
                    finished.name()
                ));
                *state = finished;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for DocumentTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.try_lock() {
            Ok(state) => state.name(),
            Err(_) => "busy",
        };
        f.debug_struct("DocumentTx")
            .field("adapter", &self.adapter)
            .field("state", &state)
            .finish()
    }
}
