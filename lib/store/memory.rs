use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use futures::future::BoxFuture;

use super::{ReferenceStore, StoreError, StoreResult};
use crate::db::models::{
    AptSale, ExchangeRate, ManagedStock, RateSymbol, RegionCode, StockName, StockPrice,
};

#[derive(Default)]
struct Tables {
    managed_stocks: BTreeMap<String, ManagedStock>,
    stock_prices: BTreeMap<(String, NaiveDate), StockPrice>,
    rate_symbols: BTreeMap<String, RateSymbol>,
    exchange_rates: BTreeMap<(String, NaiveDate), ExchangeRate>,
    stock_names: BTreeMap<String, StockName>,
    region_codes: BTreeMap<String, RegionCode>,
    apt_sales: BTreeMap<String, AptSale>,
    checkpoints: HashSet<(String, String, NaiveDate)>,
}

/// In-process store for dry runs and tests. Upserts follow the same conflict keys as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of store calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seed_managed_stocks(&self, rows: impl IntoIterator<Item = ManagedStock>) {
        let mut tables = self.lock_tables();
        for row in rows {
            tables.managed_stocks.insert(row.symbol.clone(), row);
        }
    }

    pub fn seed_rate_symbols(&self, rows: impl IntoIterator<Item = RateSymbol>) {
        let mut tables = self.lock_tables();
        for row in rows {
            tables.rate_symbols.insert(row.symbol.clone(), row);
        }
    }

    pub fn seed_region_codes(&self, rows: impl IntoIterator<Item = RegionCode>) {
        let mut tables = self.lock_tables();
        for row in rows {
            tables.region_codes.insert(row.code.clone(), row);
        }
    }

    pub fn seed_prices(&self, rows: impl IntoIterator<Item = StockPrice>) {
        let mut tables = self.lock_tables();
        for row in rows {
            tables
                .stock_prices
                .insert((row.symbol.clone(), row.date), row);
        }
    }

    pub fn seed_rates(&self, rows: impl IntoIterator<Item = ExchangeRate>) {
        let mut tables = self.lock_tables();
        for row in rows {
            tables
                .exchange_rates
                .insert((row.symbol.clone(), row.date), row);
        }
    }

    pub fn seed_listings(&self, rows: impl IntoIterator<Item = StockName>) {
        let mut tables = self.lock_tables();
        for row in rows {
            tables.stock_names.insert(row.symbol.clone(), row);
        }
    }

    pub fn prices(&self) -> Vec<StockPrice> {
        self.lock_tables().stock_prices.values().cloned().collect()
    }

    pub fn rates(&self) -> Vec<ExchangeRate> {
        self.lock_tables().exchange_rates.values().cloned().collect()
    }

    pub fn listings(&self) -> Vec<StockName> {
        self.lock_tables().stock_names.values().cloned().collect()
    }

    pub fn apt_sales(&self) -> Vec<AptSale> {
        self.lock_tables().apt_sales.values().cloned().collect()
    }

    pub fn checkpoint_count(&self, job: &str) -> usize {
        self.lock_tables()
            .checkpoints
            .iter()
            .filter(|(checkpoint_job, _, _)| checkpoint_job == job)
            .count()
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and fails it while offline.
    fn enter(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(self.lock_tables())
    }
}

impl ReferenceStore for MemoryStore {
    fn managed_stocks<'a>(
        &'a self,
        country: Option<&'a str>,
    ) -> BoxFuture<'a, StoreResult<Vec<ManagedStock>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            Ok(tables
                .managed_stocks
                .values()
                .filter(|row| row.enabled)
                .filter(|row| country.map_or(true, |country| row.country == country))
                .cloned()
                .collect())
        })
    }

    fn stored_price_keys<'a>(
        &'a self,
        symbols: &'a [String],
        dates: &'a [NaiveDate],
    ) -> BoxFuture<'a, StoreResult<HashSet<(String, NaiveDate)>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            Ok(tables
                .stock_prices
                .keys()
                .filter(|(symbol, date)| symbols.contains(symbol) && dates.contains(date))
                .cloned()
                .collect())
        })
    }

    fn upsert_prices<'a>(&'a self, rows: &'a [StockPrice]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut tables = self.enter()?;
            for row in rows {
                tables
                    .stock_prices
                    .insert((row.symbol.clone(), row.date), row.clone());
            }
            Ok(rows.len())
        })
    }

    fn active_rate_symbols(&self) -> BoxFuture<'_, StoreResult<Vec<RateSymbol>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            Ok(tables
                .rate_symbols
                .values()
                .filter(|row| row.is_active)
                .cloned()
                .collect())
        })
    }

    fn max_rate_dates<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, StoreResult<HashMap<String, NaiveDate>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            let mut latest: HashMap<String, NaiveDate> = HashMap::new();
            for (symbol, date) in tables.exchange_rates.keys() {
                if !symbols.contains(symbol) {
                    continue;
                }
                latest
                    .entry(symbol.clone())
                    .and_modify(|current| *current = (*current).max(*date))
                    .or_insert(*date);
            }
            Ok(latest)
        })
    }

    fn upsert_rates<'a>(&'a self, rows: &'a [ExchangeRate]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut tables = self.enter()?;
            for row in rows {
                tables
                    .exchange_rates
                    .insert((row.symbol.clone(), row.date), row.clone());
            }
            Ok(rows.len())
        })
    }

    fn upsert_listings<'a>(&'a self, rows: &'a [StockName]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut tables = self.enter()?;
            for row in rows {
                tables.stock_names.insert(row.symbol.clone(), row.clone());
            }
            Ok(rows.len())
        })
    }

    fn active_listing_symbols<'a>(
        &'a self,
        country: &'a str,
    ) -> BoxFuture<'a, StoreResult<HashSet<String>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            Ok(tables
                .stock_names
                .values()
                .filter(|row| row.is_active && row.country == country)
                .map(|row| row.symbol.clone())
                .collect())
        })
    }

    fn deactivate_listings<'a>(
        &'a self,
        country: &'a str,
        symbols: &'a [String],
    ) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut tables = self.enter()?;
            let mut changed = 0;
            for row in tables.stock_names.values_mut() {
                if row.country == country && symbols.contains(&row.symbol) {
                    row.is_active = false;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn region_codes(
        &self,
        max_priority: Option<i32>,
    ) -> BoxFuture<'_, StoreResult<Vec<RegionCode>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            let mut codes: Vec<RegionCode> = tables
                .region_codes
                .values()
                .filter(|row| max_priority.map_or(true, |max| row.priority <= max))
                .cloned()
                .collect();
            codes.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.code.cmp(&b.code)));
            Ok(codes)
        })
    }

    fn upsert_apt_sales<'a>(&'a self, rows: &'a [AptSale]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut tables = self.enter()?;
            for row in rows {
                tables.apt_sales.insert(row.id.clone(), row.clone());
            }
            Ok(rows.len())
        })
    }

    fn checkpointed<'a>(
        &'a self,
        job: &'a str,
        keys: &'a [String],
        as_of: NaiveDate,
    ) -> BoxFuture<'a, StoreResult<HashSet<String>>> {
        Box::pin(async move {
            let tables = self.enter()?;
            Ok(keys
                .iter()
                .filter(|key| {
                    tables
                        .checkpoints
                        .contains(&(job.to_string(), (*key).clone(), as_of))
                })
                .cloned()
                .collect())
        })
    }

    fn record_checkpoints<'a>(
        &'a self,
        job: &'a str,
        keys: &'a [String],
        as_of: NaiveDate,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut tables = self.enter()?;
            for key in keys {
                tables
                    .checkpoints
                    .insert((job.to_string(), key.clone(), as_of));
            }
            Ok(())
        })
    }
}
