//! Admission-controlled batch synchronization.
//!
//! A run resolves its targets, asks the store once which of them are already current, fetches
//! only the rest through one shared [`AdmissionQueue`] with per-call retries, then dedupes and
//! upserts what came back. Every distinct target ends up with exactly one [`EntityResult`].

pub mod admission;
pub mod dedup;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;


pub use admission::AdmissionQueue;
pub use dedup::{
    dedupe_last_wins, record_identity, DedupUpsertPipeline, Deduplicated, NaturalKey, RecordWriter,
};
pub use error::{
    Classify, ErrorClass, FetchError, FetchErrorKind, PersistError, PlanningError, RetryFailure,
};
pub use orchestrator::{SyncBinding, SyncOrchestrator};
pub use planner::{resolve_targets, DiffPlan, ResolvedTargets, TargetOrigin};
pub use retry::RetryExecutor;
pub use types::{
    AdmissionPolicy, EntityKey, EntityResult, RetryPolicy, SyncReport, SyncRun, WriteMode,
    WriteSummary,
};
