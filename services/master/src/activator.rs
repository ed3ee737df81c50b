//! Environment activator contract and the in-process simulated runtime.
//!
//! An activator turns a matched (requirement, machine) pair into a running
//! [`ActiveEnvironment`]. One activator implementation exists per
//! [`MachineKind`]; selection dispatches over the kind tag.
//!
//! The [`SimulatedActivator`] stands in for the real Hyper-V/physical
//! drivers in dev mode and in tests, the same way a mock runtime stands in
//! for a hypervisor.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use testgrid_events::{event_channel, EnvironmentEvent, TestExecutionResult};
use testgrid_id::{EnvironmentId, MachineId, RunId, TestId};
use testgrid_report::TestSection;

use crate::model::{
    EnvironmentRequirement, FailureMode, MachineDescription, MachineKind, TestStep,
};

/// Errors from activation and environment control.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The activator could not bring the environment up.
    #[error("failed to load environment: {0}")]
    LoadFailed(String),

    /// Activation did not finish within the configured bound.
    #[error("environment activation timed out after {0:?}")]
    Timeout(Duration),

    /// `execute` was called twice on the same environment.
    #[error("environment is already executing a step list")]
    AlreadyExecuting,
}

/// A handle to one running environment instance.
///
/// Exclusively owned by the controller while active. Progress and completion
/// flow over the environment's event channel, taken once by the storage
/// component when the environment is registered.
#[async_trait]
pub trait ActiveEnvironment: Send + Sync {
    /// Specification id this environment was activated for.
    fn environment(&self) -> &EnvironmentId;

    /// The machine this environment is bound to.
    fn machine(&self) -> &MachineId;

    /// Display name; report sections are keyed by it.
    fn name(&self) -> &str;

    /// Hands out the receiving half of the event channel. Single consumer:
    /// returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EnvironmentEvent>>;

    /// Dispatches the ordered step list. Steps arrive pre-sorted ascending
    /// by `order`; the environment runs them strictly in that order, halts
    /// the remainder when a step fails with [`FailureMode::Abort`], emits one
    /// `Progress` per executed step and exactly one `Completed` at the end.
    ///
    /// Returns once the run is dispatched; completion arrives on the event
    /// channel.
    async fn execute(
        &self,
        test_id: TestId,
        steps: Vec<TestStep>,
        parameters: BTreeMap<String, String>,
        package_path: Option<PathBuf>,
    ) -> Result<(), ActivationError>;

    /// Requests the environment abandon its work as soon as possible.
    /// Best-effort; callers swallow errors from this.
    async fn terminate(&self) -> Result<(), ActivationError>;
}

/// Produces active environments for one machine kind.
#[async_trait]
pub trait EnvironmentActivator: Send + Sync {
    /// The machine kind this activator can load.
    fn kind(&self) -> MachineKind;

    /// Brings up an environment on the given machine. May block on remote
    /// power-on; the caller bounds it with a timeout.
    async fn load(
        &self,
        requirement: &EnvironmentRequirement,
        machine: &MachineDescription,
        run_id: RunId,
    ) -> Result<Arc<dyn ActiveEnvironment>, ActivationError>;
}

// =============================================================================
// Simulated runtime
// =============================================================================

/// Tunable behavior for the simulated runtime.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBehavior {
    /// Fail every `load` call.
    pub fail_load: bool,

    /// Step orders that fail when executed (any environment).
    pub fail_step_orders: HashSet<i32>,

    /// Artificial latency per step.
    pub step_delay: Duration,

    /// Emit an activation progress section from `load`.
    pub announce_activation: bool,
}

/// In-process activator; stands in for a hypervisor or lab-power driver.
pub struct SimulatedActivator {
    kind: MachineKind,
    behavior: SimulatedBehavior,
    created: StdMutex<Vec<Arc<SimulatedEnvironment>>>,
}

impl SimulatedActivator {
    pub fn new(kind: MachineKind) -> Self {
        Self::with_behavior(kind, SimulatedBehavior::default())
    }

    pub fn with_behavior(kind: MachineKind, behavior: SimulatedBehavior) -> Self {
        Self {
            kind,
            behavior,
            created: StdMutex::new(Vec::new()),
        }
    }

    /// Environments this activator has loaded, in activation order.
    pub fn activated(&self) -> Vec<Arc<SimulatedEnvironment>> {
        self.created
            .lock()
            .expect("activator registry poisoned")
            .clone()
    }
}

#[async_trait]
impl EnvironmentActivator for SimulatedActivator {
    fn kind(&self) -> MachineKind {
        self.kind
    }

    async fn load(
        &self,
        requirement: &EnvironmentRequirement,
        machine: &MachineDescription,
        run_id: RunId,
    ) -> Result<Arc<dyn ActiveEnvironment>, ActivationError> {
        if self.behavior.fail_load {
            return Err(ActivationError::LoadFailed(format!(
                "simulated load failure for '{}'",
                requirement.id
            )));
        }

        let (sender, rx) = event_channel(requirement.id.clone(), requirement.name.clone());

        if self.behavior.announce_activation {
            sender.progress(
                TestSection::new("activation")
                    .info(format!("machine {} powered on", machine.id))
                    .info(format!("network {}", machine.network_name)),
            );
        }

        let environment = Arc::new(SimulatedEnvironment {
            environment: requirement.id.clone(),
            machine: machine.id.clone(),
            name: requirement.name.clone(),
            behavior: self.behavior.clone(),
            sender,
            events: StdMutex::new(Some(rx)),
            cancel: watch::channel(false).0,
            executing: AtomicBool::new(false),
            terminate_calls: AtomicUsize::new(0),
            executed_orders: Arc::new(StdMutex::new(Vec::new())),
            received_parameters: StdMutex::new(None),
        });

        info!(
            environment = %requirement.id,
            machine = %machine.id,
            run_id = %run_id,
            kind = %self.kind,
            "[SIM] Environment loaded"
        );

        self.created
            .lock()
            .expect("activator registry poisoned")
            .push(Arc::clone(&environment));

        Ok(environment)
    }
}

/// Simulated running environment: walks the ordered step list on a spawned
/// task, honoring failure modes and termination between steps.
pub struct SimulatedEnvironment {
    environment: EnvironmentId,
    machine: MachineId,
    name: String,
    behavior: SimulatedBehavior,
    sender: testgrid_events::EventSender,
    events: StdMutex<Option<mpsc::UnboundedReceiver<EnvironmentEvent>>>,
    cancel: watch::Sender<bool>,
    executing: AtomicBool,
    terminate_calls: AtomicUsize,
    executed_orders: Arc<StdMutex<Vec<i32>>>,
    received_parameters: StdMutex<Option<BTreeMap<String, String>>>,
}

impl SimulatedEnvironment {
    /// How many times `terminate` has been requested.
    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    /// Step orders executed so far, in execution order.
    pub fn executed_orders(&self) -> Vec<i32> {
        self.executed_orders
            .lock()
            .expect("step log poisoned")
            .clone()
    }

    /// Parameters received with the step dispatch, if any.
    pub fn received_parameters(&self) -> Option<BTreeMap<String, String>> {
        self.received_parameters
            .lock()
            .expect("parameter log poisoned")
            .clone()
    }
}

#[async_trait]
impl ActiveEnvironment for SimulatedEnvironment {
    fn environment(&self) -> &EnvironmentId {
        &self.environment
    }

    fn machine(&self) -> &MachineId {
        &self.machine
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EnvironmentEvent>> {
        self.events.lock().expect("event receiver poisoned").take()
    }

    async fn execute(
        &self,
        test_id: TestId,
        steps: Vec<TestStep>,
        parameters: BTreeMap<String, String>,
        package_path: Option<PathBuf>,
    ) -> Result<(), ActivationError> {
        if self.executing.swap(true, Ordering::SeqCst) {
            return Err(ActivationError::AlreadyExecuting);
        }

        info!(
            test_id = %test_id,
            environment = %self.environment,
            step_count = steps.len(),
            parameter_count = parameters.len(),
            package = ?package_path,
            "[SIM] Dispatching step list"
        );

        *self
            .received_parameters
            .lock()
            .expect("parameter log poisoned") = Some(parameters);

        let sender = self.sender.clone();
        let behavior = self.behavior.clone();
        let mut cancelled = self.cancel.subscribe();
        let environment = self.environment.clone();
        let step_log = Arc::clone(&self.executed_orders);

        tokio::spawn(async move {
            let mut failed = false;

            for step in steps {
                if *cancelled.borrow() {
                    warn!(
                        test_id = %test_id,
                        environment = %environment,
                        order = step.order,
                        "[SIM] Run abandoned before step"
                    );
                    return;
                }

                if !behavior.step_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(behavior.step_delay) => {}
                        _ = cancelled.changed() => {
                            if *cancelled.borrow() {
                                warn!(
                                    test_id = %test_id,
                                    environment = %environment,
                                    order = step.order,
                                    "[SIM] Run abandoned during step"
                                );
                                return;
                            }
                        }
                    }
                }

                step_log
                    .lock()
                    .expect("step log poisoned")
                    .push(step.order);

                let section_name = format!("step {}: {}", step.order, step.action.label());
                let step_failed = behavior.fail_step_orders.contains(&step.order);

                let section = if step_failed {
                    TestSection::new(section_name).error("simulated step failure")
                } else {
                    TestSection::new(section_name).info("completed")
                };
                sender.progress(section);

                if step_failed {
                    failed = true;
                    debug!(
                        test_id = %test_id,
                        environment = %environment,
                        order = step.order,
                        failure_mode = ?step.failure_mode,
                        "[SIM] Step failed"
                    );
                    if step.failure_mode == FailureMode::Abort {
                        break;
                    }
                }
            }

            let result = if failed {
                TestExecutionResult::Failed
            } else {
                TestExecutionResult::Passed
            };
            sender.completed(result);
        });

        Ok(())
    }

    async fn terminate(&self) -> Result<(), ActivationError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.cancel.send(true);
        info!(
            environment = %self.environment,
            machine = %self.machine,
            "[SIM] Terminate requested"
        );
        Ok(())
    }
}
