//! The finalized report tree and its leaf types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use testgrid_id::RunId;

/// Aggregate verdict of a test across all of its environments.
///
/// `None` is the pre-finalize placeholder; it is never externally observed
/// after a test completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestExecutionResult {
    #[default]
    None,
    Passed,
    Failed,
}

impl TestExecutionResult {
    /// Returns true for `Passed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestExecutionResult::None)
    }

    /// Returns true for `Failed`.
    pub fn is_failed(&self) -> bool {
        matches!(self, TestExecutionResult::Failed)
    }
}

impl std::fmt::Display for TestExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestExecutionResult::None => write!(f, "none"),
            TestExecutionResult::Passed => write!(f, "passed"),
            TestExecutionResult::Failed => write!(f, "failed"),
        }
    }
}

/// Severity of a single report message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One timestamped message inside a [`TestSection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMessage {
    pub severity: Severity,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl SectionMessage {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One progress unit emitted by an environment, typically covering a single
/// test step or an activation phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSection {
    pub name: String,
    pub messages: Vec<SectionMessage>,
}

impl TestSection {
    /// Creates an empty section with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
        }
    }

    /// Appends an info message, returning self for chaining.
    pub fn info(mut self, text: impl Into<String>) -> Self {
        self.messages.push(SectionMessage::new(Severity::Info, text));
        self
    }

    /// Appends a warning message, returning self for chaining.
    pub fn warning(mut self, text: impl Into<String>) -> Self {
        self.messages
            .push(SectionMessage::new(Severity::Warning, text));
        self
    }

    /// Appends an error message, returning self for chaining.
    pub fn error(mut self, text: impl Into<String>) -> Self {
        self.messages
            .push(SectionMessage::new(Severity::Error, text));
        self
    }

    /// Returns true if any message has `Error` severity.
    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == Severity::Error)
    }
}

/// A named group of [`TestSection`]s. The orchestrator keeps one section per
/// environment, named after the environment, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub name: String,
    pub sections: Vec<TestSection>,
}

impl ReportSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Vec::new(),
        }
    }
}

/// The finalized, immutable record of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Display name of the test this report covers.
    pub name: String,

    /// Correlation id of the activation run that produced this report.
    pub run_id: RunId,

    /// When the report was initialized.
    pub created_at: DateTime<Utc>,

    /// When the report was finalized.
    pub finalized_at: DateTime<Utc>,

    /// Aggregate verdict recorded at finalize time.
    pub result: TestExecutionResult,

    /// Per-environment sections, in first-emission order.
    pub sections: Vec<ReportSection>,
}

impl Report {
    /// Finds a section by name.
    pub fn section(&self, name: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}
