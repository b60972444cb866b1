//! The four reference-data jobs, each a [`SyncBinding`] driven by the shared engine.

pub mod calendar;
mod error;
mod exchange_rates;
mod listings;
mod prices;
#[cfg(test)]
pub(crate) mod test_support;
mod transactions;

use std::sync::Arc;

use tracing::{error, warn};

use crate::notify::Notifiers;
use crate::source::ReferenceSource;
use crate::store::ReferenceStore;
use crate::symbol_cache::SymbolCache;
use crate::sync_engine::{
    AdmissionPolicy, AdmissionQueue, RetryExecutor, RetryPolicy, SyncBinding, SyncOrchestrator,
    WriteMode,
};

pub use calendar::Calendar;
pub use error::Error;
pub use listings::{country_for_market, ListingSync, DEFAULT_MARKETS};
pub use prices::infer_country;
pub use transactions::{RegionPeriod, DEFAULT_REGION_PRIORITY};

#[derive(Debug, Clone, Default)]
pub struct SyncServiceConfig {
    pub admission: AdmissionPolicy,
    pub retry: RetryPolicy,
    /// Static override for the price job's target list.
    pub stock_symbols: Vec<String>,
}

/// Entry point for every job. One instance owns the admission queue, so all jobs
/// running through it share the same concurrency and pacing budget.
pub struct SyncService {
    store: Arc<dyn ReferenceStore>,
    source: Arc<dyn ReferenceSource>,
    queue: Arc<AdmissionQueue>,
    retry: RetryExecutor,
    notifiers: Notifiers,
    symbols: Arc<SymbolCache>,
    stock_override: Vec<String>,
    calendar: Calendar,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn ReferenceStore>,
        source: Arc<dyn ReferenceSource>,
        config: SyncServiceConfig,
    ) -> Self {
        Self {
            store,
            source,
            queue: Arc::new(AdmissionQueue::new(config.admission)),
            retry: RetryExecutor::new(config.retry),
            notifiers: Notifiers::Disabled,
            symbols: Arc::new(SymbolCache::new()),
            stock_override: prices::normalize_symbols(config.stock_symbols),
            calendar: Calendar::system(),
        }
    }

    pub fn with_notifiers(mut self, notifiers: Notifiers) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_symbol_cache(mut self, symbols: Arc<SymbolCache>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub fn symbols(&self) -> &Arc<SymbolCache> {
        &self.symbols
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub async fn refresh_symbols(&self) -> Result<usize, Error> {
        Ok(self.symbols.reload(self.store.as_ref()).await?)
    }

    fn orchestrator<B: SyncBinding>(&self, binding: B, mode: WriteMode) -> SyncOrchestrator<B> {
        let notifier = self.notifiers.for_job(binding.job());
        SyncOrchestrator::new(
            Arc::new(binding),
            Arc::clone(&self.queue),
            self.retry,
            notifier,
        )
        .with_write_mode(mode)
    }

    /// Whole-run failures get one notification without a target.
    fn report_batch_failure(&self, job: &'static str, err: &Error) {
        if err.is_invalid_request() {
            warn!(event = "sync_job_rejected", job, error = %err, "sync request rejected");
            return;
        }
        error!(event = "sync_job_failed", job, error = %err, "sync job aborted");
        self.notifiers.for_job(job).notify(None, &err.to_string());
    }
}
