use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{info, warn};

use super::{Error, SyncService};
use crate::db::models::StockName;
use crate::source::ReferenceSource;
use crate::store::{ReferenceStore, StoreError};
use crate::sync_engine::{
    resolve_targets, FetchError, PersistError, PlanningError, RecordWriter, SyncBinding,
    SyncReport, WriteMode,
};

const JOB: &str = "listings";

pub const DEFAULT_MARKETS: [&str; 6] = ["KRX", "ETF/KR", "S&P500", "NASDAQ", "NYSE", "AMEX"];

const DEFAULT_ASSET_TYPE: &str = "STOCK";

pub fn country_for_market(market: &str) -> Option<&'static str> {
    match market {
        "KRX" | "ETF/KR" => Some("KR"),
        "S&P500" | "NASDAQ" | "NYSE" | "AMEX" => Some("US"),
        _ => None,
    }
}

fn markets_of(country: &str) -> impl Iterator<Item = &'static str> + '_ {
    DEFAULT_MARKETS
        .into_iter()
        .filter(move |market| country_for_market(market) == Some(country))
}

/// Listing report plus how many stale symbols were retired per country.
#[derive(Debug, Clone, Serialize)]
pub struct ListingSync {
    #[serde(flatten)]
    pub report: SyncReport<String>,
    pub deactivated: BTreeMap<String, usize>,
}

struct ListingBinding {
    store: Arc<dyn ReferenceStore>,
    source: Arc<dyn ReferenceSource>,
    today: NaiveDate,
    /// Symbols each market returned this run.
    listed: Mutex<HashMap<String, Vec<String>>>,
}

impl ListingBinding {
    fn listed_symbols(&self, market: &str) -> Option<Vec<String>> {
        self.listed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(market)
            .cloned()
    }
}

impl RecordWriter for ListingBinding {
    type Record = StockName;

    fn upsert<'a>(
        &'a self,
        records: &'a [StockName],
    ) -> BoxFuture<'a, Result<usize, PersistError>> {
        Box::pin(async move { Ok(self.store.upsert_listings(records).await?) })
    }
}

impl SyncBinding for ListingBinding {
    type Key = String;

    fn job(&self) -> &'static str {
        JOB
    }

    /// Markets already synced today.
    fn existing_keys<'a>(
        &'a self,
        targets: &'a [String],
    ) -> BoxFuture<'a, Result<HashSet<String>, PlanningError>> {
        Box::pin(async move {
            self.store
                .checkpointed(JOB, targets, self.today)
                .await
                .map_err(StoreError::into_existence_error)
        })
    }

    fn fetch<'a>(
        &'a self,
        market: &'a String,
    ) -> BoxFuture<'a, Result<Vec<StockName>, FetchError>> {
        Box::pin(async move {
            let country = country_for_market(market).unwrap_or_default();
            let entries = self.source.fetch_listing(market).await?;

            let rows: Vec<StockName> = entries
                .into_iter()
                .filter_map(|entry| {
                    let symbol = entry.symbol.trim().to_uppercase();
                    (!symbol.is_empty()).then(|| StockName {
                        symbol,
                        name: entry.name.trim().to_string(),
                        country: country.to_string(),
                        source: market.clone(),
                        is_active: true,
                        asset_type: Some(
                            entry
                                .asset_type
                                .unwrap_or_else(|| DEFAULT_ASSET_TYPE.to_string()),
                        ),
                    })
                })
                .collect();

            self.listed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(market.clone(), rows.iter().map(|row| row.symbol.clone()).collect());
            Ok(rows)
        })
    }

    fn mark_synced<'a>(&'a self, markets: &'a [String]) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            Ok(self
                .store
                .record_checkpoints(JOB, markets, self.today)
                .await?)
        })
    }
}

impl SyncService {
    /// Refreshes `stock_names` from market listings, merged and deduped by symbol across markets.
    ///
    /// Symbols missing from a country's listings are deactivated, but only when every market of
    /// that country was fetched and written in this run.
    pub async fn sync_listings(&self, markets: Option<Vec<String>>) -> Result<ListingSync, Error> {
        let result = self.run_listings(markets).await;
        if let Err(err) = &result {
            self.report_batch_failure(JOB, err);
        }
        result
    }

    async fn run_listings(&self, markets: Option<Vec<String>>) -> Result<ListingSync, Error> {
        let requested = markets.map(|markets| {
            markets
                .into_iter()
                .map(|market| market.trim().to_uppercase())
                .filter(|market| !market.is_empty())
                .collect::<Vec<_>>()
        });
        if let Some(unknown) = requested
            .iter()
            .flatten()
            .find(|market| country_for_market(market).is_none())
        {
            return Err(Error::InvalidRequest(format!("unknown market {unknown}")));
        }

        let resolved = resolve_targets(requested, &[], || async {
            Ok::<_, StoreError>(DEFAULT_MARKETS.iter().map(|market| market.to_string()).collect())
        })
        .await?;

        let binding = ListingBinding {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            today: self.calendar.today(),
            listed: Mutex::new(HashMap::new()),
        };
        let orchestrator = self.orchestrator(binding, WriteMode::Merged);
        let report = orchestrator.run(resolved.keys).await?;

        let deactivated = self.retire_missing(orchestrator.binding(), &report).await;
        Ok(ListingSync {
            report,
            deactivated,
        })
    }

    async fn retire_missing(
        &self,
        binding: &ListingBinding,
        report: &SyncReport<String>,
    ) -> BTreeMap<String, usize> {
        let mut deactivated = BTreeMap::new();

        for country in ["KR", "US"] {
            let mut listed: HashSet<String> = HashSet::new();
            let mut complete = true;
            for market in markets_of(country) {
                let written = report
                    .result_for(&market.to_string())
                    .is_some_and(|result| result.success());
                match binding.listed_symbols(market) {
                    Some(symbols) if written => listed.extend(symbols),
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete || listed.is_empty() {
                continue;
            }

            match self.deactivate_unlisted(country, &listed).await {
                Ok(count) => {
                    info!(
                        event = "listings_deactivated",
                        country,
                        listed = listed.len(),
                        deactivated = count,
                        "retired symbols missing from listings"
                    );
                    deactivated.insert(country.to_string(), count);
                }
                Err(err) => {
                    warn!(
                        event = "listings_deactivation_failed",
                        country,
                        error = %err,
                        "could not retire missing symbols"
                    );
                    self.notifiers
                        .for_job(JOB)
                        .notify(Some(country), &format!("deactivation failed: {err}"));
                }
            }
        }
        deactivated
    }

    async fn deactivate_unlisted(
        &self,
        country: &str,
        listed: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        let active = self.store.active_listing_symbols(country).await?;
        let mut missing: Vec<String> = active.difference(listed).cloned().collect();
        missing.sort_unstable();
        self.store.deactivate_listings(country, &missing).await
    }
}

#[cfg(test)]
mod tests {
    use super::country_for_market;
    use crate::db::models::StockName;
    use crate::source::ListingEntry;
    use crate::sync_engine::{FetchError, FetchErrorKind};
    use crate::sync_service::test_support::{date, fixture};
    use crate::sync_service::Error;

    fn entry(symbol: &str, name: &str) -> ListingEntry {
        ListingEntry {
            symbol: symbol.to_string(),
            name: name.to_string(),
            asset_type: None,
        }
    }

    fn listed(symbol: &str, country: &str) -> StockName {
        StockName {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            country: country.to_string(),
            source: "seed".to_string(),
            is_active: true,
            asset_type: Some("STOCK".to_string()),
        }
    }

    fn markets(values: &[&str]) -> Option<Vec<String>> {
        Some(values.iter().map(|value| value.to_string()).collect())
    }

    #[test]
    fn markets_map_to_countries() {
        assert_eq!(country_for_market("ETF/KR"), Some("KR"));
        assert_eq!(country_for_market("NYSE"), Some("US"));
        assert_eq!(country_for_market("LSE"), None);
    }

    #[tokio::test]
    async fn merged_listing_dedupes_and_retires_missing_symbols() {
        let fx = fixture(date(2026, 10, 19), &[]);
        fx.store.seed_listings(vec![
            listed("000660", "KR"),
            listed("OLD01", "KR"),
            listed("AAPL", "US"),
        ]);
        fx.source
            .listing(
                "KRX",
                Ok(vec![entry("005930", "삼성전자"), entry("000660", "SK하이닉스")]),
            )
            .listing(
                "ETF/KR",
                Ok(vec![entry("069500", "KODEX 200"), entry("005930", "Samsung")]),
            );

        let outcome = fx
            .service
            .sync_listings(markets(&["krx", "ETF/KR"]))
            .await
            .expect("run completes");

        assert_eq!(outcome.report.success_count(), 2);
        assert_eq!(outcome.deactivated.get("KR"), Some(&1));
        assert!(!outcome.deactivated.contains_key("US"));

        let rows = fx.store.listings();
        let samsung = rows.iter().find(|row| row.symbol == "005930").expect("upserted");
        assert_eq!(samsung.name, "Samsung", "last market wins");
        let old = rows.iter().find(|row| row.symbol == "OLD01").expect("still present");
        assert!(!old.is_active);
        let apple = rows.iter().find(|row| row.symbol == "AAPL").expect("untouched");
        assert!(apple.is_active);
        assert_eq!(fx.store.checkpoint_count("listings"), 2);
    }

    #[tokio::test]
    async fn partial_country_fetch_does_not_deactivate() {
        let fx = fixture(date(2026, 10, 19), &[]);
        fx.store.seed_listings(vec![listed("OLD01", "KR")]);
        fx.source
            .listing("KRX", Ok(vec![entry("005930", "삼성전자")]));
        for _ in 0..3 {
            fx.source.listing(
                "ETF/KR",
                Err(FetchError::new(FetchErrorKind::Unavailable, "maintenance")),
            );
        }

        let outcome = fx
            .service
            .sync_listings(markets(&["KRX", "ETF/KR"]))
            .await
            .expect("run completes");

        assert_eq!(outcome.report.failure_count(), 1);
        assert!(outcome.deactivated.is_empty());
        let old = fx
            .store
            .listings()
            .into_iter()
            .find(|row| row.symbol == "OLD01")
            .expect("seeded");
        assert!(old.is_active);
        assert_eq!(fx.source.calls_for("listing:ETF/KR"), 3, "one try plus two retries");
    }

    #[tokio::test]
    async fn checkpointed_markets_are_skipped_on_rerun() {
        let fx = fixture(date(2026, 10, 19), &[]);
        fx.source.listing("NYSE", Ok(vec![entry("IBM", "IBM")]));

        fx.service
            .sync_listings(markets(&["NYSE"]))
            .await
            .expect("first run");
        let second = fx
            .service
            .sync_listings(markets(&["NYSE"]))
            .await
            .expect("second run");

        assert!(second.report.success());
        assert_eq!(fx.source.calls_for("listing:NYSE"), 1);
    }

    #[tokio::test]
    async fn unknown_market_is_rejected_before_any_call() {
        let fx = fixture(date(2026, 10, 19), &[]);

        let err = fx
            .service
            .sync_listings(markets(&["LSE"]))
            .await
            .expect_err("LSE is not mapped");

        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(fx.store.calls(), 0);
    }
}
