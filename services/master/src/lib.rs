//! testgrid Master Library
//!
//! The master is the orchestration core of the testgrid platform. It polls
//! the persistence collaborator for registered tests, matches their
//! environment requirements to idle lab machines, activates the environments
//! through kind-specific activators, dispatches ordered test steps, and
//! aggregates the asynchronous progress and completion events into one
//! finalized report per test.
//!
//! ## Modules
//!
//! - `model`: machines, environment requirements, test steps
//! - `context`: the `TestingContext` persistence seam
//! - `activator`: activator contract and the simulated runtime
//! - `controller`: environment activation authority + test lifecycle driver
//! - `storage`: in-flight test registry and event aggregation
//! - `pipeline`: finalized-report publication
//! - `worker`: the poll/completion background loop

pub mod activator;
pub mod config;
pub mod context;
pub mod controller;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use activator::{ActiveEnvironment, EnvironmentActivator, SimulatedActivator};
pub use context::{InMemoryContext, TestingContext};
pub use controller::{EnvironmentController, TestController};
pub use storage::ActiveTestStorage;
pub use worker::MasterWorker;
