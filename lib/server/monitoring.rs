use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers build identity as a labeled gauge fixed at `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "sync_worker",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    registry.sub_registry_with_prefix(prefix).register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct JobLabels {
    pub job: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RunLabels {
    pub job: &'static str,
    /// `completed`, `empty` or `planning_failed`.
    pub outcome: &'static str,
}

#[derive(Clone, Default)]
pub struct SyncMetrics {
    pub runs_total: Family<RunLabels, Counter>,
    pub entities_succeeded_total: Family<JobLabels, Counter>,
    pub entities_failed_total: Family<JobLabels, Counter>,
    /// Targets the existence query reported as already current.
    pub entities_skipped_total: Family<JobLabels, Counter>,
    /// External calls issued, first attempts and retries together.
    pub fetch_attempts_total: Family<JobLabels, Counter>,
    pub retries_total: Family<JobLabels, Counter>,
    pub records_written_total: Family<JobLabels, Counter>,
    pub duplicates_removed_total: Family<JobLabels, Counter>,
    pub queue_running: Gauge,
    pub queue_waiting: Gauge,
}

impl SyncMetrics {
    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::default();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "runs",
            "Sync runs by job and outcome",
            metrics.runs_total.clone(),
        );
        sub_registry.register(
            "entities_succeeded",
            "Entities reported as succeeded",
            metrics.entities_succeeded_total.clone(),
        );
        sub_registry.register(
            "entities_failed",
            "Entities reported as failed",
            metrics.entities_failed_total.clone(),
        );
        sub_registry.register(
            "entities_skipped",
            "Entities already current in the store, no fetch issued",
            metrics.entities_skipped_total.clone(),
        );
        sub_registry.register(
            "fetch_attempts",
            "External fetch attempts including retries",
            metrics.fetch_attempts_total.clone(),
        );
        sub_registry.register(
            "retries",
            "External fetch retries after transient failures",
            metrics.retries_total.clone(),
        );
        sub_registry.register(
            "records_written",
            "Rows handed to the store after deduplication",
            metrics.records_written_total.clone(),
        );
        sub_registry.register(
            "duplicates_removed",
            "Rows dropped by natural-key deduplication",
            metrics.duplicates_removed_total.clone(),
        );
        sub_registry.register(
            "queue_running",
            "Admission queue slots currently held",
            metrics.queue_running.clone(),
        );
        sub_registry.register(
            "queue_waiting",
            "Submissions waiting for an admission slot",
            metrics.queue_waiting.clone(),
        );
        metrics
    }
}

pub static SYNC_METRICS: OnceCell<SyncMetrics> = OnceCell::const_new();

/// Registers process metrics once; later calls are no-ops.
pub async fn register_metrics(registry: &mut Registry) {
    let sync_registry = &mut *registry;
    SYNC_METRICS
        .get_or_init(|| async move { SyncMetrics::register(sync_registry, "sync") })
        .await;
    register_build_info_metric(registry, "worker");
}
