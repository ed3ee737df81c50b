//! # testgrid-report
//!
//! The report aggregation tree and its incremental builder.
//!
//! A [`Report`] is the finalized, immutable record of one test run:
//! `Report → named ReportSections (one per environment) → TestSections with
//! timestamped info/warning/error messages`. It is assembled incrementally
//! by a [`ReportBuilder`] that moves through three states:
//!
//! ```text
//! Uninitialized ──initialize_new_report──▶ Initialized
//! Initialized   ──add_to_section──▶        Initialized
//! Initialized   ──finalize_report──▶       Finalized
//! Finalized     ──build──▶                 Report
//! ```
//!
//! Calling an operation in any other state is a [`ReportError::InvalidState`].

mod builder;
mod error;
mod types;

pub use builder::{BuilderState, ReportBuilder};
pub use error::ReportError;
pub use types::{
    Report, ReportSection, SectionMessage, Severity, TestExecutionResult, TestSection,
};
