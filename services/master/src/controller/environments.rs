//! Activation-set authority: which environment specifications exist, which
//! are live, and on which machines.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use testgrid_id::{EnvironmentId, MachineId, RunId};

use crate::activator::{ActivationError, ActiveEnvironment, EnvironmentActivator};
use crate::model::{EnvironmentRequirement, MachineDescription, MachineKind};

/// Errors from environment activation control.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No binding registered under this id.
    #[error("unknown environment specification: {0}")]
    UnknownSpecification(EnvironmentId),

    /// No activator can load this machine kind.
    #[error("no activator registered for machine kind '{0}'")]
    NoMatchingActivator(MachineKind),

    /// More than one activator claims this machine kind.
    #[error("multiple activators registered for machine kind '{0}'")]
    AmbiguousActivator(MachineKind),

    /// The environment id is already in the active set.
    #[error("environment '{0}' is already active")]
    AlreadyActive(EnvironmentId),

    /// The bound machine is already hosting another active environment.
    #[error("machine '{0}' is already hosting an active environment")]
    MachineBusy(MachineId),

    /// The environment id is not in the active set.
    #[error("environment '{0}' is not active")]
    NotActive(EnvironmentId),

    #[error(transparent)]
    Activation(#[from] ActivationError),
}

#[derive(Clone)]
struct Binding {
    requirement: EnvironmentRequirement,
    machine: MachineDescription,
}

/// Occupancy of one environment id in the active set. A `Reserved` slot
/// holds the id and its machine while the activator's `load` is in flight,
/// so the lock is never parked across the load await.
enum Slot {
    Reserved { machine: MachineId },
    Active(Arc<dyn ActiveEnvironment>),
}

impl Slot {
    fn machine(&self) -> &MachineId {
        match self {
            Slot::Reserved { machine } => machine,
            Slot::Active(env) => env.machine(),
        }
    }
}

#[derive(Default)]
struct ActiveState {
    environments: HashMap<EnvironmentId, Slot>,
    machines: HashSet<MachineId>,
}

/// Owns the activator registry, the registered environment bindings, and the
/// active/inactive partition.
///
/// The active set doubles as the machine-exclusivity authority: a machine in
/// the active machine set cannot be double-booked. The check-then-insert of
/// [`activate`](Self::activate) runs under one lock; the slot stays reserved
/// while the activator loads, so a concurrent activate never observes a
/// half-updated partition.
pub struct EnvironmentController {
    activators: Vec<Arc<dyn EnvironmentActivator>>,
    activation_timeout: Duration,
    bindings: RwLock<HashMap<EnvironmentId, Binding>>,
    active: Mutex<ActiveState>,
}

impl EnvironmentController {
    pub fn new(
        activators: Vec<Arc<dyn EnvironmentActivator>>,
        activation_timeout: Duration,
    ) -> Self {
        Self {
            activators,
            activation_timeout,
            bindings: RwLock::new(HashMap::new()),
            active: Mutex::new(ActiveState::default()),
        }
    }

    /// Registers (or replaces) the binding for an environment specification.
    pub async fn register_binding(
        &self,
        requirement: EnvironmentRequirement,
        machine: MachineDescription,
    ) {
        let id = requirement.id.clone();
        self.bindings.write().await.insert(
            id.clone(),
            Binding {
                requirement,
                machine,
            },
        );
        debug!(environment = %id, "Binding registered");
    }

    /// Activates a registered environment on its bound machine.
    ///
    /// The id and its machine are reserved in the active set before `load`
    /// runs and released again if it fails. No concurrent call can
    /// double-book either, and a slow load never parks the lock for
    /// unrelated activations or deactivations.
    pub async fn activate(
        &self,
        environment: &EnvironmentId,
        run_id: RunId,
    ) -> Result<Arc<dyn ActiveEnvironment>, ControllerError> {
        let binding = self
            .bindings
            .read()
            .await
            .get(environment)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownSpecification(environment.clone()))?;

        let activator = self.activator_for(binding.machine.kind)?;

        {
            let mut active = self.active.lock().await;
            if active.environments.contains_key(environment) {
                return Err(ControllerError::AlreadyActive(environment.clone()));
            }
            if active.machines.contains(&binding.machine.id) {
                return Err(ControllerError::MachineBusy(binding.machine.id.clone()));
            }
            active.environments.insert(
                environment.clone(),
                Slot::Reserved {
                    machine: binding.machine.id.clone(),
                },
            );
            active.machines.insert(binding.machine.id.clone());
        }

        let load = activator.load(&binding.requirement, &binding.machine, run_id);
        let env = match tokio::time::timeout(self.activation_timeout, load).await {
            Ok(Ok(env)) => env,
            Ok(Err(err)) => {
                self.release(environment).await;
                return Err(ControllerError::Activation(err));
            }
            Err(_) => {
                self.release(environment).await;
                return Err(ControllerError::Activation(ActivationError::Timeout(
                    self.activation_timeout,
                )));
            }
        };

        self.active
            .lock()
            .await
            .environments
            .insert(environment.clone(), Slot::Active(Arc::clone(&env)));

        info!(
            environment = %environment,
            machine = %binding.machine.id,
            run_id = %run_id,
            "Environment activated"
        );
        Ok(env)
    }

    /// Moves an environment (and its machine) from the active set back to
    /// the inactive side of the partition. Environments still mid-activation
    /// are not deactivatable; only the activation path may clear its own
    /// reservation.
    pub async fn deactivate(&self, environment: &EnvironmentId) -> Result<(), ControllerError> {
        let mut active = self.active.lock().await;
        match active.environments.get(environment) {
            Some(Slot::Active(env)) => {
                let machine = env.machine().clone();
                active.environments.remove(environment);
                active.machines.remove(&machine);
                info!(
                    environment = %environment,
                    machine = %machine,
                    "Environment deactivated"
                );
                Ok(())
            }
            _ => Err(ControllerError::NotActive(environment.clone())),
        }
    }

    /// Clears a reservation after a failed load.
    async fn release(&self, environment: &EnvironmentId) {
        let mut active = self.active.lock().await;
        if let Some(slot) = active.environments.remove(environment) {
            active.machines.remove(slot.machine());
        }
    }

    /// Registered environment ids currently active, ascending.
    pub async fn currently_active(&self) -> Vec<EnvironmentId> {
        let active = self.active.lock().await;
        let mut ids: Vec<EnvironmentId> = active.environments.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registered environment ids not currently active, ascending. Together
    /// with [`currently_active`](Self::currently_active) this partitions the
    /// registered set.
    pub async fn currently_inactive(&self) -> Vec<EnvironmentId> {
        let bindings = self.bindings.read().await;
        let active = self.active.lock().await;
        let mut ids: Vec<EnvironmentId> = bindings
            .keys()
            .filter(|id| !active.environments.contains_key(*id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// The live handle for an active environment, if any. Reserved slots have
    /// no handle yet.
    pub async fn active_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Option<Arc<dyn ActiveEnvironment>> {
        match self.active.lock().await.environments.get(environment) {
            Some(Slot::Active(env)) => Some(Arc::clone(env)),
            _ => None,
        }
    }

    fn activator_for(
        &self,
        kind: MachineKind,
    ) -> Result<&Arc<dyn EnvironmentActivator>, ControllerError> {
        let mut matching = self.activators.iter().filter(|a| a.kind() == kind);
        let first = matching
            .next()
            .ok_or(ControllerError::NoMatchingActivator(kind))?;
        if matching.next().is_some() {
            return Err(ControllerError::AmbiguousActivator(kind));
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::activator::SimulatedActivator;
    use crate::model::OperatingSystemSpecification;

    fn requirement(name: &str) -> EnvironmentRequirement {
        EnvironmentRequirement {
            id: name.parse().unwrap(),
            name: name.to_string(),
            operating_system: OperatingSystemSpecification::new("windows", "10.0"),
            applications: vec![],
        }
    }

    fn machine(id: &str, kind: MachineKind) -> MachineDescription {
        MachineDescription {
            id: id.parse().unwrap(),
            kind,
            name: id.to_string(),
            description: None,
            network_name: format!("{id}.grid.local"),
            mac_address: None,
            operating_system: OperatingSystemSpecification::new("windows", "10.0"),
            installed_applications: vec![],
            available_for_test: true,
            clean_after_use: false,
        }
    }

    fn controller_with(kinds: &[MachineKind]) -> EnvironmentController {
        let activators: Vec<Arc<dyn EnvironmentActivator>> = kinds
            .iter()
            .map(|k| Arc::new(SimulatedActivator::new(*k)) as Arc<dyn EnvironmentActivator>)
            .collect();
        EnvironmentController::new(activators, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn activate_moves_id_and_machine_into_active_set() {
        let controller = controller_with(&[MachineKind::Hyperv]);
        controller
            .register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;
        controller
            .register_binding(requirement("envB"), machine("lab-02", MachineKind::Hyperv))
            .await;

        let env = controller
            .activate(&"envA".parse().unwrap(), RunId::new())
            .await
            .unwrap();
        assert_eq!(env.machine().as_str(), "lab-01");

        let active = controller.currently_active().await;
        let inactive = controller.currently_inactive().await;
        assert_eq!(active, vec!["envA".parse().unwrap()]);
        assert_eq!(inactive, vec!["envB".parse().unwrap()]);
    }

    #[tokio::test]
    async fn unknown_specification_is_rejected() {
        let controller = controller_with(&[MachineKind::Hyperv]);
        let result = controller
            .activate(&"ghost".parse().unwrap(), RunId::new())
            .await;
        assert!(matches!(
            result,
            Err(ControllerError::UnknownSpecification(_))
        ));
    }

    #[tokio::test]
    async fn double_activation_is_rejected() {
        let controller = controller_with(&[MachineKind::Hyperv]);
        controller
            .register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;

        let id: EnvironmentId = "envA".parse().unwrap();
        controller.activate(&id, RunId::new()).await.unwrap();
        let second = controller.activate(&id, RunId::new()).await;
        assert!(matches!(second, Err(ControllerError::AlreadyActive(_))));
    }

    #[tokio::test]
    async fn machine_cannot_be_double_booked() {
        let controller = controller_with(&[MachineKind::Hyperv]);
        controller
            .register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;
        controller
            .register_binding(requirement("envB"), machine("lab-01", MachineKind::Hyperv))
            .await;

        controller
            .activate(&"envA".parse().unwrap(), RunId::new())
            .await
            .unwrap();
        let second = controller
            .activate(&"envB".parse().unwrap(), RunId::new())
            .await;
        assert!(matches!(second, Err(ControllerError::MachineBusy(_))));
    }

    #[tokio::test]
    async fn missing_and_ambiguous_activators_are_errors() {
        let none = controller_with(&[MachineKind::Hyperv]);
        none.register_binding(requirement("envA"), machine("rack-9", MachineKind::Physical))
            .await;
        assert!(matches!(
            none.activate(&"envA".parse().unwrap(), RunId::new()).await,
            Err(ControllerError::NoMatchingActivator(MachineKind::Physical))
        ));

        let two = controller_with(&[MachineKind::Hyperv, MachineKind::Hyperv]);
        two.register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;
        assert!(matches!(
            two.activate(&"envA".parse().unwrap(), RunId::new()).await,
            Err(ControllerError::AmbiguousActivator(MachineKind::Hyperv))
        ));
    }

    #[tokio::test]
    async fn failed_activation_leaves_the_partition_unchanged() {
        let behavior = crate::activator::SimulatedBehavior {
            fail_load: true,
            ..Default::default()
        };
        let activator: Arc<dyn EnvironmentActivator> =
            Arc::new(SimulatedActivator::with_behavior(MachineKind::Hyperv, behavior));
        let controller = EnvironmentController::new(vec![activator], Duration::from_secs(5));
        controller
            .register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;

        let result = controller
            .activate(&"envA".parse().unwrap(), RunId::new())
            .await;
        assert!(matches!(result, Err(ControllerError::Activation(_))));
        assert!(controller.currently_active().await.is_empty());
        assert_eq!(controller.currently_inactive().await.len(), 1);

        // The machine is still free for a retry.
        let ok = EnvironmentController::new(
            vec![Arc::new(SimulatedActivator::new(MachineKind::Hyperv))],
            Duration::from_secs(5),
        );
        ok.register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;
        assert!(ok
            .activate(&"envA".parse().unwrap(), RunId::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn deactivate_releases_id_and_machine() {
        let controller = controller_with(&[MachineKind::Hyperv]);
        controller
            .register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;
        controller
            .register_binding(requirement("envB"), machine("lab-01", MachineKind::Hyperv))
            .await;

        let id: EnvironmentId = "envA".parse().unwrap();
        controller.activate(&id, RunId::new()).await.unwrap();
        controller.deactivate(&id).await.unwrap();

        assert!(controller.currently_active().await.is_empty());
        assert!(matches!(
            controller.deactivate(&id).await,
            Err(ControllerError::NotActive(_))
        ));

        // The machine is free again for the other binding.
        assert!(controller
            .activate(&"envB".parse().unwrap(), RunId::new())
            .await
            .is_ok());
    }

    struct StalledActivator;

    #[async_trait]
    impl EnvironmentActivator for StalledActivator {
        fn kind(&self) -> MachineKind {
            MachineKind::Physical
        }

        async fn load(
            &self,
            _requirement: &EnvironmentRequirement,
            _machine: &MachineDescription,
            _run_id: RunId,
        ) -> Result<Arc<dyn ActiveEnvironment>, ActivationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("load never completes")
        }
    }

    struct GatedActivator {
        gate: Arc<tokio::sync::Notify>,
        inner: SimulatedActivator,
    }

    #[async_trait]
    impl EnvironmentActivator for GatedActivator {
        fn kind(&self) -> MachineKind {
            MachineKind::Hyperv
        }

        async fn load(
            &self,
            requirement: &EnvironmentRequirement,
            machine: &MachineDescription,
            run_id: RunId,
        ) -> Result<Arc<dyn ActiveEnvironment>, ActivationError> {
            self.gate.notified().await;
            self.inner.load(requirement, machine, run_id).await
        }
    }

    #[tokio::test]
    async fn in_flight_activation_does_not_block_the_active_set() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let activator: Arc<dyn EnvironmentActivator> = Arc::new(GatedActivator {
            gate: gate.clone(),
            inner: SimulatedActivator::new(MachineKind::Hyperv),
        });
        let controller = Arc::new(EnvironmentController::new(
            vec![activator],
            Duration::from_secs(5),
        ));
        controller
            .register_binding(requirement("envA"), machine("lab-01", MachineKind::Hyperv))
            .await;
        controller
            .register_binding(requirement("envB"), machine("lab-01", MachineKind::Hyperv))
            .await;

        let id: EnvironmentId = "envA".parse().unwrap();
        let worker = {
            let controller = controller.clone();
            let id = id.clone();
            tokio::spawn(async move { controller.activate(&id, RunId::new()).await })
        };

        // Wait for the reservation to land while the load is still parked
        // behind the gate.
        while !controller.currently_active().await.contains(&id) {
            tokio::task::yield_now().await;
        }

        // The reservation holds the machine and the set answers without
        // waiting for the load.
        let second = controller
            .activate(&"envB".parse().unwrap(), RunId::new())
            .await;
        assert!(matches!(second, Err(ControllerError::MachineBusy(_))));
        assert!(controller.active_environment(&id).await.is_none());
        assert!(matches!(
            controller.deactivate(&id).await,
            Err(ControllerError::NotActive(_))
        ));

        gate.notify_one();
        let env = worker.await.unwrap().unwrap();
        assert_eq!(env.machine().as_str(), "lab-01");
        assert!(controller.active_environment(&id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_load_times_out() {
        let controller =
            EnvironmentController::new(vec![Arc::new(StalledActivator)], Duration::from_secs(10));
        controller
            .register_binding(requirement("envA"), machine("rack-9", MachineKind::Physical))
            .await;

        let result = controller
            .activate(&"envA".parse().unwrap(), RunId::new())
            .await;
        assert!(matches!(
            result,
            Err(ControllerError::Activation(ActivationError::Timeout(_)))
        ));
        assert!(controller.currently_active().await.is_empty());
    }
}
