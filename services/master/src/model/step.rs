//! Ordered test steps and their actions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use testgrid_id::EnvironmentId;

/// What happens to the rest of an environment's steps when this one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Halt the remaining steps in the same environment.
    #[default]
    Abort,

    /// Record the failure and keep going.
    Continue,
}

/// The unit of work a step performs. Closed variant set; each activator's
/// environment knows how to run all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum StepAction {
    /// Install an MSI package.
    MsiInstall { package: PathBuf },

    /// Run a script through an interpreter.
    ScriptExecute {
        script: PathBuf,
        #[serde(default)]
        interpreter: Option<String>,
    },

    /// Run a console command.
    ConsoleExecute {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Recursively copy a directory tree.
    XCopy { source: PathBuf, destination: PathBuf },
}

impl StepAction {
    /// Short label used in logs and report section names.
    pub fn label(&self) -> &'static str {
        match self {
            StepAction::MsiInstall { .. } => "msi install",
            StepAction::ScriptExecute { .. } => "script execute",
            StepAction::ConsoleExecute { .. } => "console execute",
            StepAction::XCopy { .. } => "xcopy",
        }
    }
}

/// One ordered unit of work within an environment.
///
/// `order` defines the execution sequence; values need not be contiguous or
/// unique. Ties keep their original relative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    pub order: i32,

    /// Which environment specification this step runs against.
    pub environment: EnvironmentId,

    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Step-local parameters, merged over the test-level ones at dispatch.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Files or directories the environment attaches to the report.
    #[serde(default)]
    pub report_files: Vec<PathBuf>,

    pub action: StepAction,
}

/// Sorts steps ascending by `order`, keeping ties stable.
pub fn sort_steps(steps: &mut [TestStep]) {
    steps.sort_by_key(|s| s.order);
}
