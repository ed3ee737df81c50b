//! Data model for machines, environment requirements, and test steps.
//!
//! The model is deliberately closed: machine kinds and step actions are
//! tagged variants over the environment types the platform knows how to
//! drive, and activator selection dispatches over the tag.

mod machine;
mod step;

pub use machine::{
    machine_matches, ApplicationSpecification, ApplicationVersion, MachineDescription,
    MachineKind, OperatingSystemSpecification,
};
pub use step::{sort_steps, FailureMode, StepAction, TestStep};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use testgrid_id::{EnvironmentId, TestId};

/// The declarative requirement a machine must satisfy to host one
/// environment of a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRequirement {
    /// Identity of the environment specification.
    pub id: EnvironmentId,

    /// Display name; report sections and step parameters are keyed by it.
    pub name: String,

    /// Operating system the hosting machine must provide.
    pub operating_system: OperatingSystemSpecification,

    /// Applications the hosting machine must have installed, each satisfied
    /// by an equal-or-newer installed version.
    pub applications: Vec<ApplicationSpecification>,
}

/// A registered test suite: the product under test, its required
/// environments, and run-level input parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub id: TestId,
    pub name: String,
    pub environments: Vec<EnvironmentRequirement>,

    /// Test-level input parameters merged into every step dispatch.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Location of the packaged files shipped to the environments.
    #[serde(default)]
    pub package_path: Option<PathBuf>,
}
