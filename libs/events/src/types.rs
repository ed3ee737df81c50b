//! Event and completion types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use testgrid_id::{EnvironmentId, TestId};
use testgrid_report::{TestExecutionResult, TestSection};
use tokio::sync::mpsc;

/// What an environment is reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum EnvironmentEventKind {
    /// A progress unit (activation phase or completed step).
    Progress(TestSection),

    /// The environment finished; exactly one per execution.
    Completed(TestExecutionResult),
}

/// One message on an environment's outbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEvent {
    /// Specification id of the emitting environment.
    pub environment: EnvironmentId,

    /// Display name of the environment; report sections are keyed by it.
    pub environment_name: String,

    /// When the event was emitted.
    pub occurred_at: DateTime<Utc>,

    pub kind: EnvironmentEventKind,
}

/// Sending half of an environment's event channel.
///
/// Delivery failures are swallowed: the receiver disappearing means the test
/// entry was removed, which is not the environment's problem.
#[derive(Debug, Clone)]
pub struct EventSender {
    environment: EnvironmentId,
    environment_name: String,
    tx: mpsc::UnboundedSender<EnvironmentEvent>,
}

impl EventSender {
    /// Emits a progress section.
    pub fn progress(&self, section: TestSection) {
        self.emit(EnvironmentEventKind::Progress(section));
    }

    /// Emits the completion verdict.
    pub fn completed(&self, result: TestExecutionResult) {
        self.emit(EnvironmentEventKind::Completed(result));
    }

    fn emit(&self, kind: EnvironmentEventKind) {
        let event = EnvironmentEvent {
            environment: self.environment.clone(),
            environment_name: self.environment_name.clone(),
            occurred_at: Utc::now(),
            kind,
        };
        let _ = self.tx.send(event);
    }
}

/// Creates the event channel for one environment.
pub fn event_channel(
    environment: EnvironmentId,
    environment_name: impl Into<String>,
) -> (EventSender, mpsc::UnboundedReceiver<EnvironmentEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            environment,
            environment_name: environment_name.into(),
            tx,
        },
        rx,
    )
}

/// Aggregate completion of a whole tracked test, emitted exactly once per
/// add/remove lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCompletion {
    pub test_id: TestId,
    pub result: TestExecutionResult,
    pub completed_at: DateTime<Utc>,
}

impl TestCompletion {
    pub fn new(test_id: TestId, result: TestExecutionResult) -> Self {
        Self {
            test_id,
            result,
            completed_at: Utc::now(),
        }
    }
}

/// External completion-notification target for one tracked test.
pub type CompletionNotifier = mpsc::UnboundedSender<TestCompletion>;
