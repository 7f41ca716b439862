//! Per-call execution context
//!
//! Every repository call takes a [`Ctx`]. It carries an optional deadline, a
//! cancellation token, and the transaction (if any) the call must join.
//! Inside [`with_transaction`](crate::repository::RepositoryPort::with_transaction)
//! the body receives a derived `Ctx` carrying the open transaction; passing
//! that context to the same repository routes the calls through it.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use repokit::context::Ctx;
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let ctx = Ctx::new()
//!     .with_timeout(Duration::from_secs(2))
//!     .with_cancellation(token.clone());
//!
//! assert!(ctx.deadline().is_some());
//! assert!(ctx.transaction().is_none());
//! token.cancel();
//! assert!(ctx.is_cancelled());
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::repository::{RepositoryError, RepositoryOperation, RepositoryResult};

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one repository adapter instance
///
/// Transaction handles are tagged with the adapter that opened them so a
/// handle can never be used against a different store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(u64);

impl AdapterId {
    /// Allocate a fresh, process-unique id
    pub fn next() -> Self {
        Self(NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for AdapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "adapter#{}", self.0)
    }
}

/// Open transaction of one of the backend adapters
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TxHandle {
    /// Transaction on a relational (sqlx) adapter
    #[cfg(feature = "relational")]
    Relational(crate::relational::RelationalTx),
    /// Write batch on a document (SurrealDB) adapter
    #[cfg(feature = "document")]
    Document(crate::document::DocumentTx),
}

impl TxHandle {
    /// Adapter that opened the transaction
    pub fn adapter_id(&self) -> AdapterId {
        match *self {
            #[cfg(feature = "relational")]
            Self::Relational(ref tx) => tx.adapter_id(),
            #[cfg(feature = "document")]
            Self::Document(ref tx) => tx.adapter_id(),
        }
    }

    /// Backend family, for error messages
    pub fn backend(&self) -> &'static str {
        match *self {
            #[cfg(feature = "relational")]
            Self::Relational(_) => "relational",
            #[cfg(feature = "document")]
            Self::Document(_) => "document",
        }
    }

    /// Error for a handle presented to an adapter that did not open it
    pub(crate) fn foreign(&self, operation: RepositoryOperation) -> RepositoryError {
        RepositoryError::transaction_failed(format!(
            "context carries a {} transaction owned by {}",
            self.backend(),
            self.adapter_id()
        ))
        .with_operation(operation)
    }
}

/// Deadline, cancellation and transaction for one logical operation
#[derive(Debug, Clone, Default)]
pub struct Ctx {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    tx: Option<TxHandle>,
}

impl Ctx {
    /// Context with no deadline, its own cancellation token and no transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the context by `timeout` from now; an earlier deadline is kept
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the context by an absolute deadline; an earlier deadline is kept
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Use the caller's cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Derived context whose token is cancelled with this one
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
            tx: self.tx.clone(),
        }
    }

    /// Current deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token observed by this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the caller has cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Transaction this context is bound to, if any
    pub fn transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    pub(crate) fn with_transaction_handle(&self, tx: TxHandle) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.clone(),
            tx: Some(tx),
        }
    }

    /// Run one backend round-trip under this context
    ///
    /// Resolves to `Cancelled` as soon as the token fires and to `Timeout`
    /// once the deadline passes; in both cases `fut` is dropped, which hands
    /// any pooled connection back.
    pub async fn run<T, F>(&self, operation: RepositoryOperation, fut: F) -> RepositoryResult<T>
    where
        F: Future<Output = RepositoryResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(RepositoryError::cancelled(operation));
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or_else(|_| {
                        Err(RepositoryError::timeout(operation, "deadline exceeded"))
                    }),
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RepositoryError::cancelled(operation)),
            result = bounded => result,
        }
    }
}
