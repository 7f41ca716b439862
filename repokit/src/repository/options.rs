//! Find and update options

use serde_json::Value;

use super::{RepositoryError, RepositoryResult};
use crate::query::{FieldTarget, FieldValue, SortKey};

/// Ordering and windowing for a find
///
/// # Example
///
/// ```rust
/// use repokit::query::SortKey;
/// use repokit::repository::FindOptions;
///
/// let options = FindOptions::new()
///     .sort_by(SortKey::desc("votes"))
///     .sort_by(SortKey::desc("id"))
///     .with_limit(21);
/// assert_eq!(options.sort.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// ORDER BY terms, most significant first
    pub sort: Vec<SortKey>,
    /// Maximum number of documents
    pub limit: Option<u64>,
    /// Number of matching documents to skip
    pub skip: Option<u64>,
}

impl FindOptions {
    /// No ordering, no window
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an ORDER BY term
    #[must_use]
    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    /// Replace the ORDER BY terms
    #[must_use]
    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    /// Cap the number of documents
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip leading matches
    #[must_use]
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Resolve every sort field
    pub(crate) fn resolved_sort(&self) -> RepositoryResult<Vec<(FieldTarget, SortKey)>> {
        self.sort
            .iter()
            .map(|key| Ok((FieldTarget::resolve(&key.field, false)?, key.clone())))
            .collect()
    }
}

/// Whether an update touches the first match or all matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Update every matching document
    pub multi: bool,
}

impl UpdateOptions {
    /// Update only the first matching document
    pub fn single() -> Self {
        Self { multi: false }
    }

    /// Update every matching document
    pub fn multi() -> Self {
        Self { multi: true }
    }
}

/// Body changes applied by an update
///
/// Paths are dotted body paths; metadata columns cannot be patched. A path may
/// appear in only one operation, and no path may be a prefix of another.
///
/// # Example
///
/// ```rust
/// use repokit::repository::Patch;
/// use serde_json::json;
///
/// let patch = Patch::new()
///     .set("title", json!("Edited"))
///     .increment("stats.edits", 1_i64)
///     .unset("draft_notes");
/// assert!(patch.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    /// Paths to overwrite with a JSON value
    pub set: Vec<(String, Value)>,
    /// Numeric paths to add to atomically (missing counts as zero)
    pub increment: Vec<(String, FieldValue)>,
    /// Paths to remove
    pub unset: Vec<String>,
}

/// A single resolved patch step
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PatchOp {
    Set(Vec<String>, Value),
    Increment(Vec<String>, FieldValue),
    Unset(Vec<String>),
}

impl Patch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only sets fields
    pub fn set_fields(fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            set: fields.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Patch that only increments fields
    pub fn increment_fields(fields: impl IntoIterator<Item = (String, FieldValue)>) -> Self {
        Self {
            increment: fields.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Overwrite `path` with `value`
    #[must_use]
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.push((path.into(), value));
        self
    }

    /// Add `delta` to `path`
    #[must_use]
    pub fn increment(mut self, path: impl Into<String>, delta: impl Into<FieldValue>) -> Self {
        self.increment.push((path.into(), delta.into()));
        self
    }

    /// Remove `path`
    #[must_use]
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.increment.is_empty() && self.unset.is_empty()
    }

    /// Check paths, deltas and conflicts
    pub fn validate(&self) -> RepositoryResult<()> {
        self.resolve().map(|_| ())
    }

    pub(crate) fn resolve(&self) -> RepositoryResult<Vec<PatchOp>> {
        if self.is_empty() {
            return Err(RepositoryError::validation_failed("patch changes nothing"));
        }

        let mut ops = Vec::with_capacity(
            self.set.len() + self.increment.len() + self.unset.len(),
        );
        for (path, value) in &self.set {
            ops.push(PatchOp::Set(body_path(path)?, value.clone()));
        }
        for (path, delta) in &self.increment {
            match delta {
                FieldValue::Integer(_) => {}
                FieldValue::Float(n) if n.is_finite() => {}
                _ => {
                    return Err(RepositoryError::validation_failed(format!(
                        "increment for '{}' must be a finite number",
                        path
                    )))
                }
            }
            ops.push(PatchOp::Increment(body_path(path)?, delta.clone()));
        }
        for path in &self.unset {
            ops.push(PatchOp::Unset(body_path(path)?));
        }

        let paths: Vec<&[String]> = ops.iter().map(PatchOp::path).collect();
        for (i, left) in paths.iter().enumerate() {
            for right in &paths[i + 1..] {
                if left.starts_with(right) || right.starts_with(left) {
                    return Err(RepositoryError::validation_failed(format!(
                        "patch paths '{}' and '{}' overlap",
                        left.join("."),
                        right.join(".")
                    )));
                }
            }
        }
        Ok(ops)
    }
}

impl PatchOp {
    pub(crate) fn path(&self) -> &[String] {
        match self {
            Self::Set(path, _) | Self::Increment(path, _) | Self::Unset(path) => path,
        }
    }
}

fn body_path(path: &str) -> RepositoryResult<Vec<String>> {
    match FieldTarget::resolve(path, false)? {
        FieldTarget::Body(segments) => Ok(segments),
        FieldTarget::Meta(column) => Err(RepositoryError::validation_failed(format!(
            "metadata column '{}' cannot be patched",
            column.column()
        ))),
    }
}
