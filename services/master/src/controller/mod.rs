//! Orchestration controllers: the environment activation authority and the
//! test lifecycle driver.

pub mod environments;

pub use environments::{ControllerError, EnvironmentController};
pub use tests::{OrchestrationError, TestController};
