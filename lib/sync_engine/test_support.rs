use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use super::admission::AdmissionQueue;
use super::dedup::{NaturalKey, RecordWriter};
use super::error::{FetchError, PersistError, PlanningError};
use super::orchestrator::{SyncBinding, SyncOrchestrator};
use super::retry::RetryExecutor;
use super::types::{AdmissionPolicy, RetryPolicy, WriteMode};
use crate::notify::NotificationSink;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestRecord {
    pub(crate) entity: String,
    pub(crate) row_id: String,
    pub(crate) value: f64,
}

impl NaturalKey for TestRecord {
    type Key = String;

    fn natural_key(&self) -> String {
        self.row_id.clone()
    }
}

pub(crate) fn record(entity: &str, row_id: &str, value: f64) -> TestRecord {
    TestRecord {
        entity: entity.to_string(),
        row_id: row_id.to_string(),
        value,
    }
}

pub(crate) fn keys(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub(crate) fn fast_retry(max_retries: u32) -> RetryExecutor {
    RetryExecutor::new(RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
    })
}

/// Scripted store + source for orchestrator tests.
///
/// Fetches without a script return one record keyed by the entity itself.
#[derive(Default)]
pub(crate) struct ScriptedBinding {
    stored: Mutex<Vec<TestRecord>>,
    fetch_plans: Mutex<HashMap<String, VecDeque<Result<Vec<TestRecord>, FetchError>>>>,
    fetch_calls: Mutex<HashMap<String, u32>>,
    existence_calls: AtomicUsize,
    existence_failure: Mutex<Option<PlanningError>>,
    upsert_outcomes: Mutex<VecDeque<Result<(), PersistError>>>,
    upsert_batches: Mutex<Vec<Vec<TestRecord>>>,
    checkpoints: Mutex<Vec<String>>,
    checkpoint_failure: Mutex<Option<PersistError>>,
    fetch_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    panic_on: Mutex<HashSet<String>>,
}

impl ScriptedBinding {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: delay,
            ..Self::default()
        }
    }

    pub(crate) fn script(&self, key: &str, responses: Vec<Result<Vec<TestRecord>, FetchError>>) {
        self.fetch_plans
            .lock()
            .expect("fetch_plans mutex poisoned")
            .insert(key.to_string(), responses.into_iter().collect());
    }

    pub(crate) fn seed(&self, records: Vec<TestRecord>) {
        self.stored
            .lock()
            .expect("stored mutex poisoned")
            .extend(records);
    }

    pub(crate) fn fail_existence(&self, error: PlanningError) {
        *self
            .existence_failure
            .lock()
            .expect("existence_failure mutex poisoned") = Some(error);
    }

    pub(crate) fn queue_upsert_outcome(&self, outcome: Result<(), PersistError>) {
        self.upsert_outcomes
            .lock()
            .expect("upsert_outcomes mutex poisoned")
            .push_back(outcome);
    }

    pub(crate) fn fail_checkpoints(&self, error: PersistError) {
        *self
            .checkpoint_failure
            .lock()
            .expect("checkpoint_failure mutex poisoned") = Some(error);
    }

    pub(crate) fn panic_on_fetch(&self, key: &str) {
        self.panic_on
            .lock()
            .expect("panic_on mutex poisoned")
            .insert(key.to_string());
    }

    pub(crate) fn fetch_calls_for(&self, key: &str) -> u32 {
        *self
            .fetch_calls
            .lock()
            .expect("fetch_calls mutex poisoned")
            .get(key)
            .unwrap_or(&0)
    }

    pub(crate) fn total_fetch_calls(&self) -> u32 {
        self.fetch_calls
            .lock()
            .expect("fetch_calls mutex poisoned")
            .values()
            .sum()
    }

    pub(crate) fn existence_calls(&self) -> usize {
        self.existence_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn upsert_batches(&self) -> Vec<Vec<TestRecord>> {
        self.upsert_batches
            .lock()
            .expect("upsert_batches mutex poisoned")
            .clone()
    }

    pub(crate) fn stored(&self) -> Vec<TestRecord> {
        self.stored.lock().expect("stored mutex poisoned").clone()
    }

    pub(crate) fn checkpoints(&self) -> Vec<String> {
        self.checkpoints
            .lock()
            .expect("checkpoints mutex poisoned")
            .clone()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl RecordWriter for ScriptedBinding {
    type Record = TestRecord;

    fn upsert<'a>(
        &'a self,
        records: &'a [TestRecord],
    ) -> BoxFuture<'a, Result<usize, PersistError>> {
        Box::pin(async move {
            self.upsert_batches
                .lock()
                .expect("upsert_batches mutex poisoned")
                .push(records.to_vec());

            let outcome = self
                .upsert_outcomes
                .lock()
                .expect("upsert_outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(Ok(()));
            outcome?;

            let mut stored = self.stored.lock().expect("stored mutex poisoned");
            for incoming in records {
                stored.retain(|existing| existing.row_id != incoming.row_id);
                stored.push(incoming.clone());
            }
            Ok(records.len())
        })
    }
}

impl SyncBinding for ScriptedBinding {
    type Key = String;

    fn job(&self) -> &'static str {
        "scripted"
    }

    fn existing_keys<'a>(
        &'a self,
        targets: &'a [String],
    ) -> BoxFuture<'a, Result<HashSet<String>, PlanningError>> {
        Box::pin(async move {
            self.existence_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self
                .existence_failure
                .lock()
                .expect("existence_failure mutex poisoned")
                .clone()
            {
                return Err(error);
            }

            let stored = self.stored.lock().expect("stored mutex poisoned");
            Ok(targets
                .iter()
                .filter(|key| stored.iter().any(|row| &row.entity == *key))
                .cloned()
                .collect())
        })
    }

    fn fetch<'a>(&'a self, key: &'a String) -> BoxFuture<'a, Result<Vec<TestRecord>, FetchError>> {
        Box::pin(async move {
            *self
                .fetch_calls
                .lock()
                .expect("fetch_calls mutex poisoned")
                .entry(key.clone())
                .or_insert(0) += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self
                .panic_on
                .lock()
                .expect("panic_on mutex poisoned")
                .contains(key)
            {
                panic!("scripted panic for {key}");
            }

            let scripted = self
                .fetch_plans
                .lock()
                .expect("fetch_plans mutex poisoned")
                .get_mut(key)
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| Ok(vec![record(key, key, 1.0)]))
        })
    }

    fn mark_synced<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            if let Some(error) = self
                .checkpoint_failure
                .lock()
                .expect("checkpoint_failure mutex poisoned")
                .clone()
            {
                return Err(error);
            }
            self.checkpoints
                .lock()
                .expect("checkpoints mutex poisoned")
                .extend(keys.iter().cloned());
            Ok(())
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<(Option<String>, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<(Option<String>, String)> {
        self.notices.lock().expect("notices mutex poisoned").clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, target: Option<&str>, error: &str) {
        self.notices
            .lock()
            .expect("notices mutex poisoned")
            .push((target.map(str::to_string), error.to_string()));
    }
}

pub(crate) struct Harness {
    pub(crate) binding: Arc<ScriptedBinding>,
    pub(crate) queue: Arc<AdmissionQueue>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) orchestrator: SyncOrchestrator<ScriptedBinding>,
}

pub(crate) fn harness(
    binding: ScriptedBinding,
    max_concurrent: usize,
    max_retries: u32,
    mode: WriteMode,
) -> Harness {
    let binding = Arc::new(binding);
    let queue = Arc::new(AdmissionQueue::new(AdmissionPolicy {
        max_concurrent,
        min_interval: Duration::ZERO,
    }));
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = SyncOrchestrator::new(
        Arc::clone(&binding),
        Arc::clone(&queue),
        fast_retry(max_retries),
        notifier.clone(),
    )
    .with_write_mode(mode);

    Harness {
        binding,
        queue,
        notifier,
        orchestrator,
    }
}
