use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use super::admission::AdmissionQueue;
use super::dedup::{DedupUpsertPipeline, RecordWriter};
use super::error::{FetchError, PersistError, PlanningError};
use super::planner;
use super::retry::RetryExecutor;
use super::types::{EntityKey, EntityResult, SyncReport, SyncRun, WriteMode, WriteSummary};
use crate::notify::NotificationSink;
use crate::server::monitoring::{JobLabels, SYNC_METRICS};

/// One synchronizable entity kind wired to its store and source.
///
/// Implementors are usually built per run, so they may carry state gathered by
/// `existing_keys` (e.g. per-key watermarks) into `fetch`.
pub trait SyncBinding: RecordWriter + 'static {
    type Key: EntityKey;

    /// Stable job name used in logs, metrics and checkpoints.
    fn job(&self) -> &'static str;

    /// One batched query returning the subset of `targets` that needs no fetch.
    fn existing_keys<'a>(
        &'a self,
        targets: &'a [Self::Key],
    ) -> BoxFuture<'a, Result<HashSet<Self::Key>, PlanningError>>;

    /// One external call for one key.
    fn fetch<'a>(
        &'a self,
        key: &'a Self::Key,
    ) -> BoxFuture<'a, Result<Vec<Self::Record>, FetchError>>;

    /// Records that `keys` were fetched and written this run.
    fn mark_synced<'a>(
        &'a self,
        _keys: &'a [Self::Key],
    ) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async { Ok(()) })
    }
}

enum TaskOutcome<R> {
    Fetched(Vec<R>),
    Written(WriteSummary),
    Failed(String),
}

/// Drives one run: plan against the store, fetch the missing keys through the shared
/// admission queue with retries, write, and report one result per distinct target.
pub struct SyncOrchestrator<B: SyncBinding> {
    binding: Arc<B>,
    queue: Arc<AdmissionQueue>,
    retry: RetryExecutor,
    notifier: Arc<dyn NotificationSink>,
    mode: WriteMode,
}

impl<B: SyncBinding> Clone for SyncOrchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            binding: Arc::clone(&self.binding),
            queue: Arc::clone(&self.queue),
            retry: self.retry,
            notifier: Arc::clone(&self.notifier),
            mode: self.mode,
        }
    }
}

impl<B: SyncBinding> SyncOrchestrator<B> {
    pub fn new(
        binding: Arc<B>,
        queue: Arc<AdmissionQueue>,
        retry: RetryExecutor,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            binding,
            queue,
            retry,
            notifier,
            mode: WriteMode::PerEntity,
        }
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn binding(&self) -> &Arc<B> {
        &self.binding
    }

    pub async fn run(&self, targets: Vec<B::Key>) -> Result<SyncReport<B::Key>, PlanningError> {
        self.run_detailed(targets).await.map(|run| run.report)
    }

    pub async fn run_detailed(
        &self,
        targets: Vec<B::Key>,
    ) -> Result<SyncRun<B::Key>, PlanningError> {
        let job = self.binding.job();
        let span = tracing::info_span!("sync_run", job, mode = ?self.mode);
        self.run_inner(job, targets).instrument(span).await
    }

    async fn run_inner(
        &self,
        job: &'static str,
        targets: Vec<B::Key>,
    ) -> Result<SyncRun<B::Key>, PlanningError> {
        let targets = planner::dedupe_keys(targets);
        if targets.is_empty() {
            info!(event = "sync_run_empty", job, "no targets, nothing to do");
            record_run(job, "empty");
            return Ok(SyncRun::empty());
        }

        let existing = match self.binding.existing_keys(&targets).await {
            Ok(existing) => existing,
            Err(err) => {
                error!(
                    event = "sync_planning_failed",
                    job,
                    targets = targets.len(),
                    error = %err,
                    "existence query failed, aborting run"
                );
                record_run(job, "planning_failed");
                return Err(err);
            }
        };

        let plan = planner::plan(&targets, &existing);
        info!(
            event = "sync_plan_ready",
            job,
            targets = targets.len(),
            satisfied = plan.satisfied.len(),
            fetch = plan.fetch.len(),
            "planned sync run"
        );

        let mut results: Vec<EntityResult<B::Key>> = plan
            .satisfied
            .iter()
            .cloned()
            .map(EntityResult::succeeded)
            .collect();

        let handles: Vec<(B::Key, JoinHandle<TaskOutcome<B::Record>>)> = plan
            .fetch
            .into_iter()
            .map(|key| {
                let handle = self.spawn_entity(key.clone());
                (key, handle)
            })
            .collect();
        let (keys, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut written = WriteSummary::default();
        let mut synced = Vec::new();
        let mut merged: Vec<(B::Key, Vec<B::Record>)> = Vec::new();

        for (key, outcome) in keys.into_iter().zip(joined) {
            let outcome = outcome.unwrap_or_else(|join_err| {
                TaskOutcome::Failed(format!("entity task aborted: {join_err}"))
            });
            match outcome {
                TaskOutcome::Written(summary) => {
                    written.absorb(summary);
                    synced.push(key.clone());
                    results.push(EntityResult::succeeded(key));
                }
                TaskOutcome::Fetched(records) if records.is_empty() => {
                    synced.push(key.clone());
                    results.push(EntityResult::succeeded(key));
                }
                TaskOutcome::Fetched(records) => merged.push((key, records)),
                TaskOutcome::Failed(message) => results.push(EntityResult::failed(key, message)),
            }
        }

        if !merged.is_empty() {
            let (contributors, batches): (Vec<B::Key>, Vec<Vec<B::Record>>) =
                merged.into_iter().unzip();
            let pipeline = DedupUpsertPipeline::new(Arc::clone(&self.binding));
            match pipeline.process(batches.into_iter().flatten().collect()).await {
                Ok(summary) => {
                    written.absorb(summary);
                    synced.extend(contributors.iter().cloned());
                    results.extend(contributors.into_iter().map(EntityResult::succeeded));
                }
                Err(err) => {
                    error!(
                        event = "sync_merged_write_failed",
                        job,
                        contributors = contributors.len(),
                        error = %err,
                        "merged upsert failed, failing every contributing key"
                    );
                    let message = format!("write failed: {err}");
                    results.extend(
                        contributors
                            .into_iter()
                            .map(|key| EntityResult::failed(key, message.clone())),
                    );
                }
            }
        }

        if !synced.is_empty() {
            if let Err(err) = self.binding.mark_synced(&synced).await {
                warn!(
                    event = "sync_checkpoint_failed",
                    job,
                    keys = synced.len(),
                    error = %err,
                    "failed to record checkpoints, next run may refetch"
                );
            }
        }

        let report = SyncReport::from_results(results);
        for failure in report.failures() {
            let target = failure.key().to_string();
            self.notifier
                .notify(Some(&target), failure.error().unwrap_or("unknown error"));
        }
        record_report(job, &report, plan.satisfied.len(), written);
        info!(
            event = "sync_run_complete",
            job,
            total = report.total(),
            succeeded = report.success_count(),
            failed = report.failure_count(),
            written = written.written,
            duplicates = written.duplicates,
            "sync run finished"
        );

        Ok(SyncRun { report, written })
    }

    fn spawn_entity(&self, key: B::Key) -> JoinHandle<TaskOutcome<B::Record>> {
        let binding = Arc::clone(&self.binding);
        let queue = Arc::clone(&self.queue);
        let retry = self.retry;
        let mode = self.mode;
        let job = binding.job();
        let span = tracing::info_span!("sync_entity", job, key = %key);

        tokio::spawn(
            async move {
                let fetched = queue
                    .submit(|| retry.execute_counted(|_attempt| binding.fetch(&key)))
                    .await;

                let records = match fetched {
                    Ok((records, attempts)) => {
                        record_attempts(job, attempts);
                        records
                    }
                    Err(failure) => {
                        record_attempts(job, failure.attempts());
                        warn!(
                            event = "entity_fetch_failed",
                            attempts = failure.attempts(),
                            exhausted = failure.is_exhausted(),
                            error_kind = failure.error().kind.as_str(),
                            error = %failure,
                            "giving up on entity"
                        );
                        return TaskOutcome::Failed(failure.to_string());
                    }
                };

                match mode {
                    WriteMode::Merged => TaskOutcome::Fetched(records),
                    WriteMode::PerEntity => {
                        let pipeline = DedupUpsertPipeline::new(Arc::clone(&binding));
                        match pipeline.process(records).await {
                            Ok(summary) => TaskOutcome::Written(summary),
                            Err(err) => {
                                warn!(
                                    event = "entity_write_failed",
                                    error = %err,
                                    "upsert failed for entity"
                                );
                                TaskOutcome::Failed(format!("write failed: {err}"))
                            }
                        }
                    }
                }
            }
            .instrument(span),
        )
    }
}

fn record_run(job: &'static str, outcome: &'static str) {
    if let Some(metrics) = SYNC_METRICS.get() {
        metrics
            .runs_total
            .get_or_create(&crate::server::monitoring::RunLabels { job, outcome })
            .inc();
    }
}

fn record_attempts(job: &'static str, attempts: u32) {
    if let Some(metrics) = SYNC_METRICS.get() {
        let labels = JobLabels { job };
        metrics
            .fetch_attempts_total
            .get_or_create(&labels)
            .inc_by(u64::from(attempts));
        metrics
            .retries_total
            .get_or_create(&labels)
            .inc_by(u64::from(attempts.saturating_sub(1)));
    }
}

fn record_report<K>(
    job: &'static str,
    report: &SyncReport<K>,
    skipped: usize,
    written: WriteSummary,
) {
    record_run(job, "completed");
    if let Some(metrics) = SYNC_METRICS.get() {
        let labels = JobLabels { job };
        metrics
            .entities_succeeded_total
            .get_or_create(&labels)
            .inc_by(report.success_count() as u64);
        metrics
            .entities_failed_total
            .get_or_create(&labels)
            .inc_by(report.failure_count() as u64);
        metrics
            .entities_skipped_total
            .get_or_create(&labels)
            .inc_by(skipped as u64);
        metrics
            .records_written_total
            .get_or_create(&labels)
            .inc_by(written.written as u64);
        metrics
            .duplicates_removed_total
            .get_or_create(&labels)
            .inc_by(written.duplicates as u64);
    }
}
