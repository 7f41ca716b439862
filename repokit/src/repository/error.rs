//! Repository error types
//!
//! Every repository operation fails with a [`RepositoryError`] whose
//! [`RepositoryErrorKind`] tells the calling service what happened without
//! exposing backend details. Services branch on the kind (for example,
//! `NotFound` becomes a 404) and never have to parse messages.
//!
//! # Example
//!
//! ```rust
//! use repokit::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("posts", "post_123");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Inserting a new document
    Save,
    /// Finding documents matching a query
    Find,
    /// Finding a single document
    FindOne,
    /// Counting documents matching a query
    Count,
    /// Updating documents matching a query
    Update,
    /// Updating a document scoped to its owner
    UpdateWithOwnership,
    /// Deleting documents matching a query
    Delete,
    /// Deleting a document scoped to its owner
    DeleteWithOwnership,
    /// Beginning, committing or rolling back a unit of work
    Transaction,
    /// Encoding a pagination cursor
    EncodeCursor,
    /// Decoding a pagination cursor
    DecodeCursor,
    /// Translating a query model into backend predicates
    BuildQuery,
    /// Preparing storage for a collection
    EnsureCollection,
    /// Checking backend connectivity
    Ping,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Save => write!(f, "save"),
            Self::Find => write!(f, "find"),
            Self::FindOne => write!(f, "find_one"),
            Self::Count => write!(f, "count"),
            Self::Update => write!(f, "update"),
            Self::UpdateWithOwnership => write!(f, "update_with_ownership"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteWithOwnership => write!(f, "delete_with_ownership"),
            Self::Transaction => write!(f, "transaction"),
            Self::EncodeCursor => write!(f, "encode_cursor"),
            Self::DecodeCursor => write!(f, "decode_cursor"),
            Self::BuildQuery => write!(f, "build_query"),
            Self::EnsureCollection => write!(f, "ensure_collection"),
            Self::Ping => write!(f, "ping"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// A pagination token could not be decoded
    MalformedCursor,
    /// Input failed validation before reaching the backend
    ValidationFailed,
    /// No document matched (or the caller does not own it)
    NotFound,
    /// A document with the same identifier already exists
    AlreadyExists,
    /// Database constraint violation other than uniqueness
    ConstraintViolation,
    /// Begin, commit or rollback failed, or the handle was already finished
    TransactionFailed,
    /// Failed to reach the backend
    ConnectionFailed,
    /// Operation exceeded its deadline
    Timeout,
    /// Caller cancelled the operation
    Cancelled,
    /// Underlying database error
    DatabaseError,
    /// Serialization or deserialization error
    SerializationError,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCursor => write!(f, "malformed_cursor"),
            Self::ValidationFailed => write!(f, "validation_failed"),
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::TransactionFailed => write!(f, "transaction_failed"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DatabaseError => write!(f, "database_error"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// Provides detailed information about what operation failed, why it failed,
/// and which document was involved. A rollback failure keeps the error that
/// triggered the rollback in [`cause`](Self::cause) so neither is lost.
///
/// # Example
///
/// ```rust
/// use repokit::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::timeout(RepositoryOperation::Find, "deadline exceeded");
/// assert!(error.is_retriable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The collection involved (e.g., "posts", "comments")
    pub entity_type: Option<String>,
    /// The ID of the document involved
    pub entity_id: Option<String>,
    /// The error that led to this one, if any
    pub cause: Option<Box<RepositoryError>>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
            cause: None,
        }
    }

    /// Create a "not found" error with document context
    ///
    /// Ownership-scoped mutations also report this kind when the caller does
    /// not own the document, so existence is not leaked to non-owners.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::FindOne,
            RepositoryErrorKind::NotFound,
            "Document not found",
        )
        .with_entity(entity_type, entity_id)
    }

    /// Create an "already exists" error with document context
    pub fn already_exists(entity_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Save,
            RepositoryErrorKind::AlreadyExists,
            "Document already exists",
        )
        .with_entity(entity_type, identifier)
    }

    /// Create a validation failed error
    ///
    /// ```rust
    /// use repokit::repository::{RepositoryError, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::validation_failed("cursor id must not be empty");
    /// assert_eq!(error.kind, RepositoryErrorKind::ValidationFailed);
    /// ```
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::BuildQuery,
            RepositoryErrorKind::ValidationFailed,
            message,
        )
    }

    /// Create a malformed cursor error
    pub fn malformed_cursor(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::DecodeCursor,
            RepositoryErrorKind::MalformedCursor,
            message,
        )
    }

    /// Create a constraint violation error
    pub fn constraint_violation(
        operation: RepositoryOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::ConstraintViolation, message)
    }

    /// Create a transaction failed error
    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Transaction,
            RepositoryErrorKind::TransactionFailed,
            message,
        )
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Ping,
            RepositoryErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Create a timeout error
    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    /// Create a cancellation error
    pub fn cancelled(operation: RepositoryOperation) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::Cancelled,
            "Operation cancelled by caller",
        )
    }

    /// Create a database error
    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    /// Create a serialization error
    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    /// Add document context to an existing error
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Add only the collection to an existing error
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Attach the error that led to this one
    #[must_use]
    pub fn with_cause(mut self, cause: RepositoryError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Check if this error is retriable (backend unavailable or timed out)
    ///
    /// The repository layer never retries on its own; callers decide whether a
    /// write is safe to repeat.
    ///
    /// ```rust
    /// use repokit::repository::RepositoryError;
    ///
    /// assert!(RepositoryError::connection_failed("connection reset").is_retriable());
    /// assert!(!RepositoryError::not_found("posts", "123").is_retriable());
    /// ```
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }

    /// Whether the error reports a missing (or not owned) document
    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// Whether the error reports a duplicate identifier
    pub fn is_already_exists(&self) -> bool {
        self.kind == RepositoryErrorKind::AlreadyExists
    }

    /// Whether the caller sent an unusable cursor or query
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::MalformedCursor | RepositoryErrorKind::ValidationFailed
        )
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => write!(f, " [{}: {}]", entity_type, entity_id)?,
            (Some(entity_type), None) => write!(f, " [{}]", entity_type)?,
            _ => {}
        }
        if let Some(ref cause) = self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
