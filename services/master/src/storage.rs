//! Tracks in-flight tests and aggregates their environment events.
//!
//! One [`TestRecord`] exists per tracked test; each record carries its own
//! lock, so event handling for one test never blocks another. A consumer
//! task per environment drains that environment's event channel into the
//! test's report builder and drives the aggregate verdict:
//!
//! - the first `Failed` completion wins, terminates the sibling
//!   environments, and finalizes the report as failed;
//! - when every environment completes `Passed`, the report finalizes as
//!   passed;
//! - events arriving after the verdict is fixed are dropped.
//!
//! Exactly one [`TestCompletion`] is emitted per tracked test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use testgrid_events::{
    CompletionNotifier, EnvironmentEvent, EnvironmentEventKind, TestCompletion,
    TestExecutionResult,
};
use testgrid_id::{EnvironmentId, TestId};
use testgrid_report::{Report, ReportBuilder, TestSection};

use crate::activator::ActiveEnvironment;

/// Errors from the active-test registry.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("test {0} is already tracked")]
    AlreadyTracked(TestId),

    #[error("test {0} is not tracked")]
    UnknownTest(TestId),

    #[error("test {0} has not completed")]
    NotCompleted(TestId),
}

struct RecordInner {
    builder: ReportBuilder,
    environments: Vec<Arc<dyn ActiveEnvironment>>,

    /// Environments that have not yet reported a completion.
    pending: usize,

    /// Set when the aggregate verdict is fixed; later events are dropped.
    completed: bool,

    notifiers: Vec<CompletionNotifier>,

    /// Consumer tasks draining the environment channels; aborted when the
    /// record is removed so a finished test releases everything it held.
    consumers: Vec<tokio::task::JoinHandle<()>>,
}

/// One tracked test. All mutable state sits behind the record's own lock.
pub struct TestRecord {
    test_id: TestId,
    inner: Mutex<RecordInner>,
}

impl TestRecord {
    pub fn test_id(&self) -> TestId {
        self.test_id
    }
}

/// Registry of tests currently executing on activated environments.
///
/// The outer map lock is held only for lookups and insert/remove; event
/// aggregation takes the per-record lock instead.
pub struct ActiveTestStorage {
    tests: RwLock<HashMap<TestId, Arc<TestRecord>>>,
    completion_tx: mpsc::UnboundedSender<TestCompletion>,
    completion_rx: StdMutex<Option<mpsc::UnboundedReceiver<TestCompletion>>>,
}

impl Default for ActiveTestStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveTestStorage {
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            tests: RwLock::new(HashMap::new()),
            completion_tx,
            completion_rx: StdMutex::new(Some(completion_rx)),
        }
    }

    /// Hands out the aggregate completion stream. Single consumer: returns
    /// `None` after the first call.
    pub fn completions(&self) -> Option<mpsc::UnboundedReceiver<TestCompletion>> {
        self.completion_rx
            .lock()
            .expect("completion receiver poisoned")
            .take()
    }

    /// Starts tracking a test. The builder must already be initialized; the
    /// test's environments are attached afterwards with
    /// [`add_environment_for_test`](Self::add_environment_for_test).
    pub async fn add(
        &self,
        test_id: TestId,
        builder: ReportBuilder,
        notifiers: Vec<CompletionNotifier>,
    ) -> Result<(), StorageError> {
        let mut tests = self.tests.write().await;
        if tests.contains_key(&test_id) {
            return Err(StorageError::AlreadyTracked(test_id));
        }
        tests.insert(
            test_id,
            Arc::new(TestRecord {
                test_id,
                inner: Mutex::new(RecordInner {
                    builder,
                    environments: Vec::new(),
                    pending: 0,
                    completed: false,
                    notifiers,
                    consumers: Vec::new(),
                }),
            }),
        );
        info!(test_id = %test_id, "Tracking test");
        Ok(())
    }

    /// Attaches an activated environment to a tracked test and starts
    /// draining its event channel into the test's report.
    ///
    /// Must be called before the environment's `execute`, otherwise early
    /// events race the consumer registration.
    pub async fn add_environment_for_test(
        &self,
        test_id: TestId,
        environment: Arc<dyn ActiveEnvironment>,
    ) -> Result<(), StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;

        let Some(events) = environment.take_events() else {
            // The channel was already claimed; attaching twice is a bug in
            // the caller, not a recoverable condition for this test.
            warn!(
                test_id = %test_id,
                environment = %environment.environment(),
                "Event channel already taken, environment not attached"
            );
            return Ok(());
        };

        {
            let mut inner = record.inner.lock().await;
            inner.environments.push(Arc::clone(&environment));
            inner.pending += 1;
        }

        let completion_tx = self.completion_tx.clone();
        let consumer = tokio::spawn(consume_events(Arc::clone(&record), events, completion_tx));
        record.inner.lock().await.consumers.push(consumer);

        debug!(
            test_id = %test_id,
            environment = %environment.environment(),
            "Environment attached"
        );
        Ok(())
    }

    /// Registers an additional completion-notification target for a test
    /// that is already tracked.
    pub async fn register_notifier(
        &self,
        test_id: TestId,
        notifier: CompletionNotifier,
    ) -> Result<(), StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;
        record.inner.lock().await.notifiers.push(notifier);
        Ok(())
    }

    /// Reports an out-of-band failure for one environment of a tracked test
    /// (activation watchdog, lost machine). Drives the same first-failure
    /// path as a `Failed` completion from the environment itself.
    pub async fn environment_failure(
        &self,
        test_id: TestId,
        environment: &EnvironmentId,
        reason: &str,
    ) -> Result<(), StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;

        {
            let mut inner = record.inner.lock().await;
            if inner.completed {
                return Ok(());
            }
            // Report sections are keyed by the environment's display name,
            // same as the progress path.
            let name = inner
                .environments
                .iter()
                .find(|e| e.environment() == environment)
                .map(|e| e.name().to_string())
                .unwrap_or_else(|| environment.to_string());
            let section = TestSection::new(&name).error(reason);
            if let Err(err) = inner.builder.add_to_section(&name, section) {
                warn!(test_id = %test_id, %err, "Could not record failure section");
            }
        }

        settle(
            &record,
            TestExecutionResult::Failed,
            environment,
            &self.completion_tx,
        )
        .await;
        Ok(())
    }

    /// Stops tracking a test. The caller deactivates the test's environments
    /// first. Consumer tasks are aborted and the environment handles dropped,
    /// so the record releases everything it held.
    pub async fn remove(&self, test_id: TestId) -> Result<(), StorageError> {
        let removed = self.tests.write().await.remove(&test_id);
        match removed {
            Some(record) => {
                let mut inner = record.inner.lock().await;
                for consumer in inner.consumers.drain(..) {
                    consumer.abort();
                }
                inner.environments.clear();
                info!(test_id = %test_id, "Stopped tracking test");
                Ok(())
            }
            None => Err(StorageError::UnknownTest(test_id)),
        }
    }

    /// Snapshot of the report builder as it stands, in whatever lifecycle
    /// state it is in.
    pub async fn report_for(&self, test_id: TestId) -> Result<ReportBuilder, StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;
        let inner = record.inner.lock().await;
        Ok(inner.builder.clone())
    }

    /// The built report, available once the test's verdict is fixed.
    pub async fn finalized_report(&self, test_id: TestId) -> Result<Report, StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;
        let inner = record.inner.lock().await;
        inner
            .builder
            .build()
            .map_err(|_| StorageError::NotCompleted(test_id))
    }

    /// Completion-notification targets registered for a test.
    pub async fn notifications_for(
        &self,
        test_id: TestId,
    ) -> Result<Vec<CompletionNotifier>, StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;
        let notifiers = record.inner.lock().await.notifiers.clone();
        Ok(notifiers)
    }

    /// Environments attached to a tracked test, in attachment order.
    pub async fn environments_for_test(
        &self,
        test_id: TestId,
    ) -> Result<Vec<Arc<dyn ActiveEnvironment>>, StorageError> {
        let record = self
            .record(test_id)
            .await
            .ok_or(StorageError::UnknownTest(test_id))?;
        let environments = record.inner.lock().await.environments.clone();
        Ok(environments)
    }

    pub async fn contains(&self, test_id: TestId) -> bool {
        self.tests.read().await.contains_key(&test_id)
    }

    pub async fn count(&self) -> usize {
        self.tests.read().await.len()
    }

    /// IDs of all tracked tests, ascending.
    pub async fn tracked_tests(&self) -> Vec<TestId> {
        let mut ids: Vec<TestId> = self.tests.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    async fn record(&self, test_id: TestId) -> Option<Arc<TestRecord>> {
        self.tests.read().await.get(&test_id).cloned()
    }
}

/// Drains one environment's event channel into the test record.
async fn consume_events(
    record: Arc<TestRecord>,
    mut events: mpsc::UnboundedReceiver<EnvironmentEvent>,
    completion_tx: mpsc::UnboundedSender<TestCompletion>,
) {
    while let Some(event) = events.recv().await {
        match event.kind {
            EnvironmentEventKind::Progress(section) => {
                let mut inner = record.inner.lock().await;
                if inner.completed {
                    debug!(
                        test_id = %record.test_id,
                        environment = %event.environment,
                        "Dropping progress after verdict"
                    );
                    continue;
                }
                if let Err(err) = inner
                    .builder
                    .add_to_section(&event.environment_name, section)
                {
                    warn!(
                        test_id = %record.test_id,
                        environment = %event.environment,
                        %err,
                        "Could not append progress section"
                    );
                }
            }
            EnvironmentEventKind::Completed(result) => {
                settle(&record, result, &event.environment, &completion_tx).await;
            }
        }
    }
}

/// Applies one environment completion to the aggregate verdict.
///
/// Anything other than `Passed` fixes the verdict as failed immediately and
/// terminates the sibling environments; `Passed` only settles the test once
/// every environment has reported.
async fn settle(
    record: &Arc<TestRecord>,
    result: TestExecutionResult,
    environment: &EnvironmentId,
    completion_tx: &mpsc::UnboundedSender<TestCompletion>,
) {
    let mut to_terminate: Vec<Arc<dyn ActiveEnvironment>> = Vec::new();
    let verdict = {
        let mut inner = record.inner.lock().await;
        if inner.completed {
            debug!(
                test_id = %record.test_id,
                environment = %environment,
                "Dropping completion after verdict"
            );
            return;
        }
        inner.pending = inner.pending.saturating_sub(1);

        let verdict = if result == TestExecutionResult::Passed {
            if inner.pending > 0 {
                debug!(
                    test_id = %record.test_id,
                    environment = %environment,
                    pending = inner.pending,
                    "Environment passed, others still running"
                );
                return;
            }
            TestExecutionResult::Passed
        } else {
            to_terminate = inner
                .environments
                .iter()
                .filter(|env| env.environment() != environment)
                .cloned()
                .collect();
            TestExecutionResult::Failed
        };

        inner.completed = true;
        if let Err(err) = inner.builder.finalize_report(verdict) {
            error!(test_id = %record.test_id, %err, "Could not finalize report");
        }

        let completion = TestCompletion::new(record.test_id, verdict);
        for notifier in &inner.notifiers {
            let _ = notifier.send(completion.clone());
        }
        let _ = completion_tx.send(completion);
        verdict
    };

    info!(
        test_id = %record.test_id,
        environment = %environment,
        result = %verdict,
        "Test settled"
    );

    // Best effort, outside the record lock; a terminated environment emits
    // no further completion.
    for env in to_terminate {
        if let Err(err) = env.terminate().await {
            warn!(
                test_id = %record.test_id,
                environment = %env.environment(),
                %err,
                "Terminate request failed"
            );
        }
    }
}
