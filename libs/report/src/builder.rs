//! Incremental report builder.

use chrono::{DateTime, Utc};
use testgrid_id::RunId;

use crate::error::ReportError;
use crate::types::{Report, ReportSection, TestExecutionResult, TestSection};

/// Builder lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Uninitialized,
    Initialized,
    Finalized,
}

/// Builds a [`Report`] incrementally as environments emit progress.
///
/// The builder is not shared directly between threads; the orchestrator keeps
/// one builder per tracked test behind that test's record lock.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    state: BuilderState,
    name: String,
    run_id: RunId,
    created_at: Option<DateTime<Utc>>,
    finalized_at: Option<DateTime<Utc>>,
    result: TestExecutionResult,
    sections: Vec<ReportSection>,
}

impl ReportBuilder {
    /// Creates an uninitialized builder for the given run.
    pub fn new(run_id: RunId) -> Self {
        Self {
            state: BuilderState::Uninitialized,
            name: String::new(),
            run_id,
            created_at: None,
            finalized_at: None,
            result: TestExecutionResult::None,
            sections: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// Begins a new report. Valid only in `Uninitialized`.
    pub fn initialize_new_report(&mut self, name: impl Into<String>) -> Result<(), ReportError> {
        if self.state != BuilderState::Uninitialized {
            return Err(ReportError::InvalidState {
                operation: "initialize_new_report",
                state: self.state,
            });
        }
        self.name = name.into();
        self.created_at = Some(Utc::now());
        self.state = BuilderState::Initialized;
        Ok(())
    }

    /// Appends a test section under the named report section, creating the
    /// report section on first use. Valid only in `Initialized`.
    pub fn add_to_section(
        &mut self,
        section_name: &str,
        section: TestSection,
    ) -> Result<(), ReportError> {
        if self.state != BuilderState::Initialized {
            return Err(ReportError::InvalidState {
                operation: "add_to_section",
                state: self.state,
            });
        }

        match self.sections.iter_mut().find(|s| s.name == section_name) {
            Some(existing) => existing.sections.push(section),
            None => {
                let mut created = ReportSection::new(section_name);
                created.sections.push(section);
                self.sections.push(created);
            }
        }
        Ok(())
    }

    /// Records the aggregate verdict and freezes the report.
    /// Valid only in `Initialized`.
    pub fn finalize_report(&mut self, result: TestExecutionResult) -> Result<(), ReportError> {
        if self.state != BuilderState::Initialized {
            return Err(ReportError::InvalidState {
                operation: "finalize_report",
                state: self.state,
            });
        }
        self.result = result;
        self.finalized_at = Some(Utc::now());
        self.state = BuilderState::Finalized;
        Ok(())
    }

    /// Produces the immutable report. Valid only in `Finalized`.
    pub fn build(&self) -> Result<Report, ReportError> {
        if self.state != BuilderState::Finalized {
            return Err(ReportError::InvalidState {
                operation: "build",
                state: self.state,
            });
        }

        Ok(Report {
            name: self.name.clone(),
            run_id: self.run_id,
            // Both timestamps are set on the transitions that reach Finalized.
            created_at: self.created_at.unwrap_or_else(Utc::now),
            finalized_at: self.finalized_at.unwrap_or_else(Utc::now),
            result: self.result,
            sections: self.sections.clone(),
        })
    }
}
