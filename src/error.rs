//! Construction-time specification errors.
//!
//! `SpecError` is raised synchronously when a candidate specification is
//! rejected. It never produces an execution report: a control that fails
//! to construct is never compiled or executed.

/// Result type for specification construction.
pub type SpecResult<T> = Result<T, SpecError>;

/// A specification was rejected at construction time.
///
/// `path` points at the offending node in the document tree
/// (e.g. `assertions[2].materiality_threshold_percent`); `reason` says
/// why it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("invalid specification at {path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl SpecError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SpecError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The document path the rejection points at.
    pub fn path(&self) -> &str {
        match self {
            SpecError::Invalid { path, .. } => path,
        }
    }
}
