use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use tracing::info;

use super::{Error, SyncService};
use crate::db::models::StockPrice;
use crate::source::ReferenceSource;
use crate::store::{ReferenceStore, StoreError};
use crate::sync_engine::{
    resolve_targets, FetchError, FetchErrorKind, PersistError, PlanningError, RecordWriter,
    SyncBinding, SyncReport, WriteMode,
};

const JOB: &str = "prices";

/// Trims, upper-cases and drops blank symbols.
pub(super) fn normalize_symbols(symbols: Vec<String>) -> Vec<String> {
    symbols
        .into_iter()
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .collect()
}

/// Country for symbols that are not in `managed_stocks`: Korean exchange suffixes and bare
/// six-digit codes are `KR`, everything else `US`.
pub fn infer_country(symbol: &str) -> &'static str {
    let symbol = symbol.to_ascii_uppercase();
    let bare_krx_code = symbol.len() == 6 && symbol.bytes().all(|byte| byte.is_ascii_digit());
    if symbol.ends_with(".KS") || symbol.ends_with(".KQ") || bare_krx_code {
        "KR"
    } else {
        "US"
    }
}

/// US sessions close after midnight KST, so their latest close belongs to yesterday.
fn as_of_for(country: &str, today: NaiveDate, yesterday: NaiveDate) -> NaiveDate {
    if country.eq_ignore_ascii_case("US") {
        yesterday
    } else {
        today
    }
}

struct PriceBinding {
    store: Arc<dyn ReferenceStore>,
    source: Arc<dyn ReferenceSource>,
    as_of: HashMap<String, NaiveDate>,
}

impl RecordWriter for PriceBinding {
    type Record = StockPrice;

    fn upsert<'a>(
        &'a self,
        records: &'a [StockPrice],
    ) -> BoxFuture<'a, Result<usize, PersistError>> {
        Box::pin(async move { Ok(self.store.upsert_prices(records).await?) })
    }
}

impl SyncBinding for PriceBinding {
    type Key = String;

    fn job(&self) -> &'static str {
        JOB
    }

    fn existing_keys<'a>(
        &'a self,
        targets: &'a [String],
    ) -> BoxFuture<'a, Result<HashSet<String>, PlanningError>> {
        Box::pin(async move {
            let mut dates: Vec<NaiveDate> = self.as_of.values().copied().collect();
            dates.sort_unstable();
            dates.dedup();

            let stored = self
                .store
                .stored_price_keys(targets, &dates)
                .await
                .map_err(StoreError::into_existence_error)?;

            Ok(targets
                .iter()
                .filter(|symbol| {
                    self.as_of
                        .get(*symbol)
                        .is_some_and(|date| stored.contains(&((*symbol).clone(), *date)))
                })
                .cloned()
                .collect())
        })
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a String,
    ) -> BoxFuture<'a, Result<Vec<StockPrice>, FetchError>> {
        Box::pin(async move {
            let date = self.as_of.get(symbol).copied().ok_or_else(|| {
                FetchError::new(
                    FetchErrorKind::InvalidInput,
                    format!("no as-of date resolved for {symbol}"),
                )
            })?;
            let quote = self.source.fetch_quote(symbol).await?;
            Ok(vec![StockPrice {
                symbol: symbol.clone(),
                date,
                close_price: quote.price,
                currency: quote.currency,
                name: quote.name,
                change_percent: quote.change_percent,
            }])
        })
    }
}

impl SyncService {
    /// Brings the latest close of every target symbol into `stock_prices`.
    ///
    /// Targets come from `symbols`, else the `STOCK_SYMBOLS` override, else the enabled managed
    /// stocks of `country` (all countries when `None`).
    pub async fn update_prices(
        &self,
        symbols: Option<Vec<String>>,
        country: Option<&str>,
    ) -> Result<SyncReport<String>, Error> {
        let result = self.run_prices(symbols, country).await;
        if let Err(err) = &result {
            self.report_batch_failure(JOB, err);
        }
        result
    }

    async fn run_prices(
        &self,
        symbols: Option<Vec<String>>,
        country: Option<&str>,
    ) -> Result<SyncReport<String>, Error> {
        let country = country
            .map(|country| country.trim().to_uppercase())
            .filter(|country| !country.is_empty());
        let country_filter = country.as_deref();

        let mut managed_countries: HashMap<String, String> = HashMap::new();
        let managed = &mut managed_countries;
        let store = Arc::clone(&self.store);
        let resolved = resolve_targets(
            symbols.map(normalize_symbols),
            &self.stock_override,
            move || async move {
                let rows = store.managed_stocks(country_filter).await?;
                let mut symbols = Vec::with_capacity(rows.len());
                for row in rows {
                    let symbol = row.symbol.to_uppercase();
                    managed.insert(symbol.clone(), row.country);
                    symbols.push(symbol);
                }
                Ok::<_, StoreError>(symbols)
            },
        )
        .await?;

        info!(
            event = "price_targets_resolved",
            origin = resolved.origin.as_str(),
            country = country_filter.unwrap_or("all"),
            targets = resolved.keys.len(),
            "resolved price targets"
        );

        let today = self.calendar.today();
        let yesterday = self.calendar.yesterday();
        let as_of = resolved
            .keys
            .iter()
            .map(|symbol| {
                let country = managed_countries
                    .get(symbol)
                    .map(String::as_str)
                    .unwrap_or_else(|| infer_country(symbol));
                (symbol.clone(), as_of_for(country, today, yesterday))
            })
            .collect();

        let binding = PriceBinding {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            as_of,
        };
        Ok(self
            .orchestrator(binding, WriteMode::PerEntity)
            .run(resolved.keys)
            .await?)
    }
}
