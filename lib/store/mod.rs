//! Persistence collaborator: batched existence queries, conflict-key upserts and target lookups.

mod error;
pub mod memory;
pub mod postgres;

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use futures::future::BoxFuture;

use crate::db::models::{
    AptSale, ExchangeRate, ManagedStock, RateSymbol, RegionCode, StockName, StockPrice,
};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything the sync jobs read from and write to.
///
/// Every method is one round trip; callers batch keys instead of looping.
pub trait ReferenceStore: Send + Sync {
    /// Enabled managed stocks, optionally restricted to one country.
    fn managed_stocks<'a>(
        &'a self,
        country: Option<&'a str>,
    ) -> BoxFuture<'a, StoreResult<Vec<ManagedStock>>>;

    /// `(symbol, date)` pairs present in `stock_prices` for any of `symbols` on any of `dates`.
    fn stored_price_keys<'a>(
        &'a self,
        symbols: &'a [String],
        dates: &'a [NaiveDate],
    ) -> BoxFuture<'a, StoreResult<HashSet<(String, NaiveDate)>>>;

    fn upsert_prices<'a>(&'a self, rows: &'a [StockPrice]) -> BoxFuture<'a, StoreResult<usize>>;

    fn active_rate_symbols(&self) -> BoxFuture<'_, StoreResult<Vec<RateSymbol>>>;

    /// Latest stored date per symbol; symbols without rows are absent from the map.
    fn max_rate_dates<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, StoreResult<HashMap<String, NaiveDate>>>;

    fn upsert_rates<'a>(&'a self, rows: &'a [ExchangeRate]) -> BoxFuture<'a, StoreResult<usize>>;

    fn upsert_listings<'a>(&'a self, rows: &'a [StockName]) -> BoxFuture<'a, StoreResult<usize>>;

    fn active_listing_symbols<'a>(
        &'a self,
        country: &'a str,
    ) -> BoxFuture<'a, StoreResult<HashSet<String>>>;

    /// Marks `symbols` of `country` inactive and returns how many rows changed.
    fn deactivate_listings<'a>(
        &'a self,
        country: &'a str,
        symbols: &'a [String],
    ) -> BoxFuture<'a, StoreResult<usize>>;

    /// Region codes with `priority <= max_priority`, or all of them.
    fn region_codes(
        &self,
        max_priority: Option<i32>,
    ) -> BoxFuture<'_, StoreResult<Vec<RegionCode>>>;

    fn upsert_apt_sales<'a>(&'a self, rows: &'a [AptSale]) -> BoxFuture<'a, StoreResult<usize>>;

    /// Subset of `keys` already checkpointed for `job` on `as_of`.
    fn checkpointed<'a>(
        &'a self,
        job: &'a str,
        keys: &'a [String],
        as_of: NaiveDate,
    ) -> BoxFuture<'a, StoreResult<HashSet<String>>>;

    fn record_checkpoints<'a>(
        &'a self,
        job: &'a str,
        keys: &'a [String],
        as_of: NaiveDate,
    ) -> BoxFuture<'a, StoreResult<()>>;
}
