//! Errors surfaced by transactional execution.
//!
//! Conflicts are classified by [`ConflictKind`] rather than by matching
//! on message text: the storage layer constructs a [`ConflictError`] with
//! the right kind at the point where it knows what went wrong, and the
//! retry loop keys off that kind alone.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::partition::ResolveError;

/// The transient storage conflicts a retry can plausibly clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Optimistic version check failed: someone else updated the row.
    VersionConflict,
    /// A unique index rejected the write.
    UniquenessViolation,
    /// Some other database constraint rejected the write.
    ConstraintViolation,
    /// A row or advisory lock could not be acquired in time.
    LockAcquisition,
    /// Two writers raced to insert the same row into a shared lookup
    /// table (tag or parameter definitions); the loser can simply retry
    /// and find the row present.
    DuplicateDefinition,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VersionConflict => "version conflict",
            Self::UniquenessViolation => "uniqueness violation",
            Self::ConstraintViolation => "constraint violation",
            Self::LockAcquisition => "lock acquisition failure",
            Self::DuplicateDefinition => "duplicate definition race",
        };
        f.write_str(name)
    }
}

/// A retriable storage conflict.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ConflictError {
    pub kind: ConflictKind,
    pub message: String,
    /// Structured diagnostics from the storage layer. Carried through
    /// retries and terminal wrapping untouched so the surface layer can
    /// render them for the caller.
    pub diagnostics: Option<Value>,
}

impl ConflictError {
    #[must_use]
    pub fn new(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: None,
        }
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Value) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

/// Failure of a transactional unit of work.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The effective partition could not be determined.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A retriable conflict on the only (or first unretried) attempt.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A conflict survived the whole retry budget.
    #[error("max retries ({retries}) exceeded for version conflict: {conflict}")]
    RetriesExhausted { retries: u32, conflict: ConflictError },

    /// Anything else: callback failures, runner failures, logic errors in
    /// the unit of work.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ExecuteError {
    /// The conflict behind this error, when there is one.
    #[must_use]
    pub fn conflict(&self) -> Option<&ConflictError> {
        match self {
            Self::Conflict(conflict) | Self::RetriesExhausted { conflict, .. } => Some(conflict),
            Self::Resolve(_) | Self::Internal(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_is_the_error_display() {
        let error = ConflictError::new(ConflictKind::VersionConflict, "row moved under us");
        assert_eq!(error.to_string(), "row moved under us");
        assert_eq!(ConflictKind::DuplicateDefinition.to_string(), "duplicate definition race");
    }

    #[test]
    fn exhaustion_message_names_the_budget_and_cause() {
        let conflict = ConflictError::new(ConflictKind::UniquenessViolation, "duplicate key");
        let error = ExecuteError::RetriesExhausted {
            retries: 3,
            conflict,
        };
        assert_eq!(
            error.to_string(),
            "max retries (3) exceeded for version conflict: duplicate key"
        );
    }

    #[test]
    fn diagnostics_survive_wrapping() {
        let diagnostics = serde_json::json!({ "constraint": "idx_resource_version" });
        let conflict = ConflictError::new(ConflictKind::ConstraintViolation, "constraint failed")
            .with_diagnostics(diagnostics.clone());

        let terminal = ExecuteError::RetriesExhausted {
            retries: 2,
            conflict,
        };
        assert_eq!(
            terminal.conflict().unwrap().diagnostics.as_ref(),
            Some(&diagnostics)
        );

        let first_attempt: ExecuteError =
            ConflictError::new(ConflictKind::VersionConflict, "stale write").into();
        assert!(first_attempt.conflict().is_some());
        assert!(ExecuteError::Internal(anyhow::anyhow!("boom"))
            .conflict()
            .is_none());
    }
}
