//! Error types for report construction.

use thiserror::Error;

use crate::builder::BuilderState;

/// Errors that can occur while building a report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// An operation was invoked in a state that does not allow it.
    #[error("'{operation}' is not valid in builder state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: BuilderState,
    },
}
