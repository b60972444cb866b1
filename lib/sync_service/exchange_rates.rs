use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use futures::future::BoxFuture;
use tracing::{debug, info};

use super::{Error, SyncService};
use crate::db::models::ExchangeRate;
use crate::source::{RatePoint, ReferenceSource};
use crate::store::{ReferenceStore, StoreError};
use crate::symbol_cache::SymbolTable;
use crate::sync_engine::{
    resolve_targets, FetchError, PersistError, PlanningError, RecordWriter, SyncBinding,
    SyncReport, WriteMode,
};

const JOB: &str = "exchange_rates";

/// First sync of a symbol pulls one year of history.
const INITIAL_LOOKBACK_DAYS: i64 = 365;

struct RateBinding {
    store: Arc<dyn ReferenceStore>,
    source: Arc<dyn ReferenceSource>,
    symbols: Arc<SymbolTable>,
    today: NaiveDate,
    /// Latest stored date per symbol, captured by the existence query.
    watermarks: Mutex<HashMap<String, NaiveDate>>,
}

impl RateBinding {
    fn since(&self, symbol: &str) -> NaiveDate {
        self.watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
            .unwrap_or_else(|| self.today - chrono::Duration::days(INITIAL_LOOKBACK_DAYS))
    }

    fn to_row(&self, symbol: &str, point: RatePoint) -> ExchangeRate {
        let meta = self.symbols.get(symbol);
        ExchangeRate {
            symbol: symbol.to_string(),
            date: point.date,
            close_price: point.close,
            adj_close_price: point.adj_close.or(Some(point.close)),
            currency: meta.and_then(|meta| meta.currency.clone()),
            name: meta.map(|meta| meta.name.clone()),
        }
    }
}

impl RecordWriter for RateBinding {
    type Record = ExchangeRate;

    fn upsert<'a>(
        &'a self,
        records: &'a [ExchangeRate],
    ) -> BoxFuture<'a, Result<usize, PersistError>> {
        Box::pin(async move { Ok(self.store.upsert_rates(records).await?) })
    }
}

impl SyncBinding for RateBinding {
    type Key = String;

    fn job(&self) -> &'static str {
        JOB
    }

    /// A symbol is current once its latest stored row is dated today or later.
    fn existing_keys<'a>(
        &'a self,
        targets: &'a [String],
    ) -> BoxFuture<'a, Result<HashSet<String>, PlanningError>> {
        Box::pin(async move {
            let watermarks = self
                .store
                .max_rate_dates(targets)
                .await
                .map_err(StoreError::into_existence_error)?;

            let current = watermarks
                .iter()
                .filter(|(_, latest)| **latest >= self.today)
                .map(|(symbol, _)| symbol.clone())
                .collect();
            *self.watermarks.lock().unwrap_or_else(PoisonError::into_inner) = watermarks;
            Ok(current)
        })
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a String,
    ) -> BoxFuture<'a, Result<Vec<ExchangeRate>, FetchError>> {
        Box::pin(async move {
            let since = self.since(symbol);
            let points = self.source.fetch_rate_series(symbol, since).await?;
            debug!(
                event = "rate_series_fetched",
                symbol = %symbol,
                since = %since,
                points = points.len(),
                "fetched rate series"
            );
            Ok(points
                .into_iter()
                .map(|point| self.to_row(symbol, point))
                .collect())
        })
    }
}

impl SyncService {
    /// Incrementally syncs daily closes for exchange rates and indices.
    ///
    /// `symbols` may mix symbols and display names; `None` or an empty list means every active
    /// rate symbol in the store.
    pub async fn sync_exchange_rates(
        &self,
        symbols: Option<Vec<String>>,
    ) -> Result<SyncReport<String>, Error> {
        let result = self.run_exchange_rates(symbols).await;
        if let Err(err) = &result {
            self.report_batch_failure(JOB, err);
        }
        result
    }

    async fn run_exchange_rates(
        &self,
        symbols: Option<Vec<String>>,
    ) -> Result<SyncReport<String>, Error> {
        let cache = Arc::clone(&self.symbols);
        let store = Arc::clone(&self.store);
        let resolved = resolve_targets(symbols, &[], move || async move {
            let rows = store.active_rate_symbols().await?;
            let symbols: Vec<String> = rows.iter().map(|row| row.symbol.clone()).collect();
            cache.replace(rows);
            Ok::<_, StoreError>(symbols)
        })
        .await?;

        let table = self.symbols.snapshot();
        let targets: Vec<String> = resolved
            .keys
            .iter()
            .map(|input| table.resolve(input))
            .filter(|symbol| !symbol.is_empty())
            .collect();
        info!(
            event = "rate_targets_resolved",
            origin = resolved.origin.as_str(),
            targets = targets.len(),
            cached_symbols = table.len(),
            "resolved exchange rate targets"
        );

        let binding = RateBinding {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            symbols: table,
            today: self.calendar.today(),
            watermarks: Mutex::new(HashMap::new()),
        };
        Ok(self
            .orchestrator(binding, WriteMode::PerEntity)
            .run(targets)
            .await?)
    }
}
