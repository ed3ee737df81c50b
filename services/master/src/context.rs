//! Persistence collaborator interface and an in-memory implementation.
//!
//! The master never talks to storage directly; everything flows through the
//! [`TestingContext`] trait. The real deployment backs it with the database
//! service; [`InMemoryContext`] backs it in dev mode and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use testgrid_id::{EnvironmentId, MachineId, TestId};
use testgrid_report::TestExecutionResult;

use crate::model::{
    machine_matches, ApplicationSpecification, EnvironmentRequirement, MachineDescription,
    OperatingSystemSpecification, Test, TestStep,
};

/// Errors surfaced by the persistence collaborator.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unknown test: {0}")]
    UnknownTest(TestId),

    #[error("unknown machine: {0}")]
    UnknownMachine(MachineId),

    #[error("unknown environment: {0}")]
    UnknownEnvironment(EnvironmentId),

    /// Backend-specific failure (connection loss, constraint violation, ...).
    #[error("context backend error: {0}")]
    Backend(String),
}

/// The persistence surface the orchestrator consumes.
#[async_trait]
pub trait TestingContext: Send + Sync {
    /// Tests that are registered but not yet started.
    async fn inactive_tests(&self) -> Result<Vec<Test>, ContextError>;

    /// Idle machines satisfying the given OS and application requirements.
    async fn inactive_machines_with(
        &self,
        os: &OperatingSystemSpecification,
        apps: &[ApplicationSpecification],
    ) -> Result<Vec<MachineDescription>, ContextError>;

    /// Ordered steps registered for one environment specification.
    async fn test_steps_for_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<TestStep>, ContextError>;

    /// Marks a test as started.
    async fn start_test(&self, test_id: TestId) -> Result<(), ContextError>;

    /// Persists the terminal verdict for a test.
    async fn finish_test(
        &self,
        test_id: TestId,
        result: TestExecutionResult,
    ) -> Result<(), ContextError>;

    /// Claims a machine so no other environment can be placed on it.
    async fn mark_machine_as_active(&self, machine: &MachineId) -> Result<(), ContextError>;

    /// Returns a machine to the idle pool.
    async fn mark_machine_as_inactive(&self, machine: &MachineId) -> Result<(), ContextError>;

    /// Records which machine ended up hosting an environment.
    async fn test_environment_supported_by_machine(
        &self,
        environment: &EnvironmentId,
        machine: &MachineId,
    ) -> Result<(), ContextError>;

    /// All known applications (registration-side lookup data).
    async fn applications(&self) -> Result<Vec<ApplicationSpecification>, ContextError>;

    /// All known operating systems (registration-side lookup data).
    async fn operating_systems(&self) -> Result<Vec<OperatingSystemSpecification>, ContextError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestPhase {
    Inactive,
    Started,
    Finished(TestExecutionResult),
}

#[derive(Debug)]
struct MachineEntry {
    description: MachineDescription,
    active: bool,
}

#[derive(Default)]
struct ContextState {
    tests: HashMap<TestId, (Test, TestPhase)>,
    machines: HashMap<MachineId, MachineEntry>,
    steps: HashMap<EnvironmentId, Vec<TestStep>>,
    supported_by: HashMap<EnvironmentId, MachineId>,
}

/// In-process implementation of [`TestingContext`].
#[derive(Default)]
pub struct InMemoryContext {
    state: RwLock<ContextState>,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test in the inactive state.
    pub async fn add_test(&self, test: Test) {
        let mut state = self.state.write().await;
        state.tests.insert(test.id, (test, TestPhase::Inactive));
    }

    /// Registers an idle machine.
    pub async fn add_machine(&self, description: MachineDescription) {
        let mut state = self.state.write().await;
        state.machines.insert(
            description.id.clone(),
            MachineEntry {
                description,
                active: false,
            },
        );
    }

    /// Registers the ordered step list for an environment specification.
    pub async fn add_steps(&self, environment: EnvironmentId, steps: Vec<TestStep>) {
        let mut state = self.state.write().await;
        state.steps.insert(environment, steps);
    }

    /// Terminal verdict persisted for a test, if any.
    pub async fn finished_result(&self, test_id: TestId) -> Option<TestExecutionResult> {
        let state = self.state.read().await;
        match state.tests.get(&test_id) {
            Some((_, TestPhase::Finished(result))) => Some(*result),
            _ => None,
        }
    }

    /// Whether a machine is currently claimed.
    pub async fn machine_active(&self, machine: &MachineId) -> bool {
        let state = self.state.read().await;
        state
            .machines
            .get(machine)
            .map(|m| m.active)
            .unwrap_or(false)
    }

    /// Which machine was recorded as hosting an environment.
    pub async fn machine_for_environment(&self, environment: &EnvironmentId) -> Option<MachineId> {
        let state = self.state.read().await;
        state.supported_by.get(environment).cloned()
    }
}

#[async_trait]
impl TestingContext for InMemoryContext {
    async fn inactive_tests(&self) -> Result<Vec<Test>, ContextError> {
        let state = self.state.read().await;
        let mut tests: Vec<Test> = state
            .tests
            .values()
            .filter(|(_, phase)| *phase == TestPhase::Inactive)
            .map(|(test, _)| test.clone())
            .collect();
        tests.sort_by_key(|t| t.id);
        Ok(tests)
    }

    async fn inactive_machines_with(
        &self,
        os: &OperatingSystemSpecification,
        apps: &[ApplicationSpecification],
    ) -> Result<Vec<MachineDescription>, ContextError> {
        // machine_matches wants a requirement; build a probe from the query.
        let probe = EnvironmentRequirement {
            id: EnvironmentId::new("probe").map_err(|e| ContextError::Backend(e.to_string()))?,
            name: "probe".to_string(),
            operating_system: os.clone(),
            applications: apps.to_vec(),
        };

        let state = self.state.read().await;
        let mut machines: Vec<MachineDescription> = state
            .machines
            .values()
            .filter(|entry| !entry.active && machine_matches(&entry.description, &probe))
            .map(|entry| entry.description.clone())
            .collect();
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(
            os = %os.name,
            matches = machines.len(),
            "Queried inactive machines"
        );
        Ok(machines)
    }

    async fn test_steps_for_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<TestStep>, ContextError> {
        let state = self.state.read().await;
        Ok(state.steps.get(environment).cloned().unwrap_or_default())
    }

    async fn start_test(&self, test_id: TestId) -> Result<(), ContextError> {
        let mut state = self.state.write().await;
        let (_, phase) = state
            .tests
            .get_mut(&test_id)
            .ok_or(ContextError::UnknownTest(test_id))?;
        *phase = TestPhase::Started;
        Ok(())
    }

    async fn finish_test(
        &self,
        test_id: TestId,
        result: TestExecutionResult,
    ) -> Result<(), ContextError> {
        let mut state = self.state.write().await;
        let (_, phase) = state
            .tests
            .get_mut(&test_id)
            .ok_or(ContextError::UnknownTest(test_id))?;
        *phase = TestPhase::Finished(result);
        Ok(())
    }

    async fn mark_machine_as_active(&self, machine: &MachineId) -> Result<(), ContextError> {
        let mut state = self.state.write().await;
        let entry = state
            .machines
            .get_mut(machine)
            .ok_or_else(|| ContextError::UnknownMachine(machine.clone()))?;
        entry.active = true;
        Ok(())
    }

    async fn mark_machine_as_inactive(&self, machine: &MachineId) -> Result<(), ContextError> {
        let mut state = self.state.write().await;
        let entry = state
            .machines
            .get_mut(machine)
            .ok_or_else(|| ContextError::UnknownMachine(machine.clone()))?;
        entry.active = false;
        Ok(())
    }

    async fn test_environment_supported_by_machine(
        &self,
        environment: &EnvironmentId,
        machine: &MachineId,
    ) -> Result<(), ContextError> {
        let mut state = self.state.write().await;
        if !state.machines.contains_key(machine) {
            return Err(ContextError::UnknownMachine(machine.clone()));
        }
        state
            .supported_by
            .insert(environment.clone(), machine.clone());
        Ok(())
    }

    async fn applications(&self) -> Result<Vec<ApplicationSpecification>, ContextError> {
        let state = self.state.read().await;
        let mut apps: Vec<ApplicationSpecification> = state
            .machines
            .values()
            .flat_map(|entry| entry.description.installed_applications.iter().cloned())
            .collect();
        apps.sort_by(|a, b| (&a.name, a.version).cmp(&(&b.name, b.version)));
        apps.dedup();
        Ok(apps)
    }

    async fn operating_systems(&self) -> Result<Vec<OperatingSystemSpecification>, ContextError> {
        let state = self.state.read().await;
        let mut systems: Vec<OperatingSystemSpecification> = state
            .machines
            .values()
            .map(|entry| entry.description.operating_system.clone())
            .collect();
        systems.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        systems.dedup();
        Ok(systems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplicationVersion, MachineKind};

    fn machine(id: &str, apps: Vec<ApplicationSpecification>) -> MachineDescription {
        MachineDescription {
            id: id.parse().unwrap(),
            kind: MachineKind::Hyperv,
            name: id.to_string(),
            description: None,
            network_name: format!("{id}.grid.local"),
            mac_address: None,
            operating_system: OperatingSystemSpecification::new("windows", "10.0"),
            installed_applications: apps,
            available_for_test: true,
            clean_after_use: false,
        }
    }

    #[tokio::test]
    async fn inactive_machines_excludes_active_ones() {
        let ctx = InMemoryContext::new();
        ctx.add_machine(machine("lab-01", vec![])).await;
        ctx.add_machine(machine("lab-02", vec![])).await;

        let os = OperatingSystemSpecification::new("windows", "10.0");
        assert_eq!(ctx.inactive_machines_with(&os, &[]).await.unwrap().len(), 2);

        ctx.mark_machine_as_active(&"lab-01".parse().unwrap())
            .await
            .unwrap();
        let remaining = ctx.inactive_machines_with(&os, &[]).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "lab-02");
    }

    #[tokio::test]
    async fn inactive_machines_applies_application_requirements() {
        let ctx = InMemoryContext::new();
        let sql15 = ApplicationSpecification::new("sql-server", ApplicationVersion::new(15, 0, 0, 0));
        let sql16 = ApplicationSpecification::new("sql-server", ApplicationVersion::new(16, 0, 0, 0));
        ctx.add_machine(machine("lab-01", vec![sql15.clone()])).await;

        let os = OperatingSystemSpecification::new("windows", "10.0");
        assert_eq!(
            ctx.inactive_machines_with(&os, std::slice::from_ref(&sql15))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(ctx
            .inactive_machines_with(&os, &[sql16])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_phase_transitions() {
        let ctx = InMemoryContext::new();
        let test = Test {
            id: TestId::new(10),
            name: "suite".to_string(),
            environments: vec![],
            parameters: Default::default(),
            package_path: None,
        };
        ctx.add_test(test).await;

        assert_eq!(ctx.inactive_tests().await.unwrap().len(), 1);
        ctx.start_test(TestId::new(10)).await.unwrap();
        assert!(ctx.inactive_tests().await.unwrap().is_empty());

        ctx.finish_test(TestId::new(10), TestExecutionResult::Passed)
            .await
            .unwrap();
        assert_eq!(
            ctx.finished_result(TestId::new(10)).await,
            Some(TestExecutionResult::Passed)
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_errors() {
        let ctx = InMemoryContext::new();
        assert!(ctx.start_test(TestId::new(99)).await.is_err());
        assert!(ctx
            .mark_machine_as_active(&"ghost".parse().unwrap())
            .await
            .is_err());
    }
}
