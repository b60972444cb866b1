use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use serde::Serialize;

/// Identity of one synchronizable entity (a ticker, a market code, a region/period pair).
pub trait EntityKey: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static {}

impl<T> EntityKey for T where
    T: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

/// Concurrency and pacing limits for the shared admission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub max_concurrent: usize,
    /// Minimum gap between two consecutive dispatches, across the whole queue.
    pub min_interval: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_interval: Duration::from_millis(200),
        }
    }
}

/// Backoff settings for one external call.
///
/// `max_retries` counts retries, so a call is attempted at most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

/// How fetched records reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Each entity's records are deduped and upserted on their own.
    #[default]
    PerEntity,
    /// Records of every fetched entity are merged, deduped once and written in one upsert.
    Merged,
}

/// Outcome for one distinct target key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityResult<K> {
    key: K,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<K> EntityResult<K> {
    pub fn succeeded(key: K) -> Self {
        Self {
            key,
            success: true,
            error: None,
        }
    }

    pub fn failed(key: K, error: impl Into<String>) -> Self {
        Self {
            key,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Aggregate outcome of one synchronization run.
///
/// Counts are derived from `results` at construction, so
/// `total == success_count + failure_count == results.len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport<K> {
    success: bool,
    total: usize,
    success_count: usize,
    failure_count: usize,
    results: Vec<EntityResult<K>>,
}

impl<K> SyncReport<K> {
    pub fn from_results(results: Vec<EntityResult<K>>) -> Self {
        let success_count = results.iter().filter(|result| result.success).count();
        Self {
            success: true,
            total: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
        }
    }

    pub fn empty() -> Self {
        Self::from_results(Vec::new())
    }

    /// Run-level flag. Per-entity failures never clear it; a run that could not plan
    /// returns an error instead of a report.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn results(&self) -> &[EntityResult<K>] {
        &self.results
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityResult<K>> {
        self.results.iter().filter(|result| !result.success)
    }

    pub fn result_for(&self, key: &K) -> Option<&EntityResult<K>>
    where
        K: PartialEq,
    {
        self.results.iter().find(|result| &result.key == key)
    }

    pub fn into_results(self) -> Vec<EntityResult<K>> {
        self.results
    }

    /// Re-keys the report, e.g. to expose string keys over HTTP.
    pub fn map_keys<J>(self, mut f: impl FnMut(K) -> J) -> SyncReport<J> {
        SyncReport::from_results(
            self.results
                .into_iter()
                .map(|result| EntityResult {
                    key: f(result.key),
                    success: result.success,
                    error: result.error,
                })
                .collect(),
        )
    }
}

/// Rows handed to the writer after deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSummary {
    pub written: usize,
    pub duplicates: usize,
}

impl WriteSummary {
    pub fn absorb(&mut self, other: WriteSummary) {
        self.written += other.written;
        self.duplicates += other.duplicates;
    }
}

/// Report plus write totals, for callers that post-process a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun<K> {
    pub report: SyncReport<K>,
    pub written: WriteSummary,
}

impl<K> SyncRun<K> {
    pub fn empty() -> Self {
        Self {
            report: SyncReport::empty(),
            written: WriteSummary::default(),
        }
    }
}
