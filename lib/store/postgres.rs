use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use diesel::dsl::max;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;

use super::{ReferenceStore, StoreError, StoreResult};
use crate::db::models::{
    AptSale, ExchangeRate, ManagedStock, NewSyncCheckpoint, RateSymbol, RegionCode, StockName,
    StockPrice,
};
use crate::db::schema::{
    apt_sales, exchange_rates, managed_stocks, rate_symbols, region_codes, stock_names,
    stock_prices, sync_checkpoints,
};
use crate::db::PgPool;

/// Keeps each statement well under Postgres' bind parameter limit.
const UPSERT_CHUNK_ROWS: usize = 1_000;

/// Postgres-backed store used by the production runtime.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<Object<AsyncPgConnection>> {
        Ok(self.pool.get().await?)
    }
}

impl ReferenceStore for PgStore {
    fn managed_stocks<'a>(
        &'a self,
        country: Option<&'a str>,
    ) -> BoxFuture<'a, StoreResult<Vec<ManagedStock>>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut query = managed_stocks::table
                .filter(managed_stocks::enabled.eq(true))
                .order(managed_stocks::symbol.asc())
                .into_boxed();
            if let Some(country) = country {
                query = query.filter(managed_stocks::country.eq(country));
            }
            Ok(query
                .select(ManagedStock::as_select())
                .load(&mut conn)
                .await?)
        })
    }

    fn stored_price_keys<'a>(
        &'a self,
        symbols: &'a [String],
        dates: &'a [NaiveDate],
    ) -> BoxFuture<'a, StoreResult<HashSet<(String, NaiveDate)>>> {
        Box::pin(async move {
            if symbols.is_empty() || dates.is_empty() {
                return Ok(HashSet::new());
            }
            let mut conn = self.conn().await?;
            let rows: Vec<(String, NaiveDate)> = stock_prices::table
                .filter(stock_prices::symbol.eq_any(symbols))
                .filter(stock_prices::date.eq_any(dates))
                .select((stock_prices::symbol, stock_prices::date))
                .load(&mut conn)
                .await?;
            Ok(rows.into_iter().collect())
        })
    }

    fn upsert_prices<'a>(&'a self, rows: &'a [StockPrice]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut written = 0;
            for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
                written += diesel::insert_into(stock_prices::table)
                    .values(chunk)
                    .on_conflict((stock_prices::symbol, stock_prices::date))
                    .do_update()
                    .set((
                        stock_prices::close_price.eq(excluded(stock_prices::close_price)),
                        stock_prices::currency.eq(excluded(stock_prices::currency)),
                        stock_prices::name.eq(excluded(stock_prices::name)),
                        stock_prices::change_percent.eq(excluded(stock_prices::change_percent)),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            Ok(written)
        })
    }

    fn active_rate_symbols(&self) -> BoxFuture<'_, StoreResult<Vec<RateSymbol>>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            Ok(rate_symbols::table
                .filter(rate_symbols::is_active.eq(true))
                .order(rate_symbols::symbol.asc())
                .select(RateSymbol::as_select())
                .load(&mut conn)
                .await?)
        })
    }

    fn max_rate_dates<'a>(
        &'a self,
        symbols: &'a [String],
    ) -> BoxFuture<'a, StoreResult<HashMap<String, NaiveDate>>> {
        Box::pin(async move {
            if symbols.is_empty() {
                return Ok(HashMap::new());
            }
            let mut conn = self.conn().await?;
            let rows: Vec<(String, Option<NaiveDate>)> = exchange_rates::table
                .filter(exchange_rates::symbol.eq_any(symbols))
                .group_by(exchange_rates::symbol)
                .select((exchange_rates::symbol, max(exchange_rates::date)))
                .load(&mut conn)
                .await?;
            Ok(rows
                .into_iter()
                .filter_map(|(symbol, date)| date.map(|date| (symbol, date)))
                .collect())
        })
    }

    fn upsert_rates<'a>(&'a self, rows: &'a [ExchangeRate]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut written = 0;
            for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
                written += diesel::insert_into(exchange_rates::table)
                    .values(chunk)
                    .on_conflict((exchange_rates::symbol, exchange_rates::date))
                    .do_update()
                    .set((
                        exchange_rates::close_price.eq(excluded(exchange_rates::close_price)),
                        exchange_rates::adj_close_price
                            .eq(excluded(exchange_rates::adj_close_price)),
                        exchange_rates::currency.eq(excluded(exchange_rates::currency)),
                        exchange_rates::name.eq(excluded(exchange_rates::name)),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            Ok(written)
        })
    }

    fn upsert_listings<'a>(&'a self, rows: &'a [StockName]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut written = 0;
            for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
                written += diesel::insert_into(stock_names::table)
                    .values(chunk)
                    .on_conflict(stock_names::symbol)
                    .do_update()
                    .set((
                        stock_names::name.eq(excluded(stock_names::name)),
                        stock_names::country.eq(excluded(stock_names::country)),
                        stock_names::source.eq(excluded(stock_names::source)),
                        stock_names::is_active.eq(excluded(stock_names::is_active)),
                        stock_names::asset_type.eq(excluded(stock_names::asset_type)),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            Ok(written)
        })
    }

    fn active_listing_symbols<'a>(
        &'a self,
        country: &'a str,
    ) -> BoxFuture<'a, StoreResult<HashSet<String>>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let symbols: Vec<String> = stock_names::table
                .filter(stock_names::country.eq(country))
                .filter(stock_names::is_active.eq(true))
                .select(stock_names::symbol)
                .load(&mut conn)
                .await?;
            Ok(symbols.into_iter().collect())
        })
    }

    fn deactivate_listings<'a>(
        &'a self,
        country: &'a str,
        symbols: &'a [String],
    ) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            if symbols.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn().await?;
            Ok(diesel::update(
                stock_names::table
                    .filter(stock_names::country.eq(country))
                    .filter(stock_names::symbol.eq_any(symbols)),
            )
            .set(stock_names::is_active.eq(false))
            .execute(&mut conn)
            .await?)
        })
    }

    fn region_codes(
        &self,
        max_priority: Option<i32>,
    ) -> BoxFuture<'_, StoreResult<Vec<RegionCode>>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut query = region_codes::table
                .order((region_codes::priority.asc(), region_codes::code.asc()))
                .into_boxed();
            if let Some(max_priority) = max_priority {
                query = query.filter(region_codes::priority.le(max_priority));
            }
            Ok(query
                .select(RegionCode::as_select())
                .load(&mut conn)
                .await?)
        })
    }

    fn upsert_apt_sales<'a>(&'a self, rows: &'a [AptSale]) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut written = 0;
            for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
                written += diesel::insert_into(apt_sales::table)
                    .values(chunk)
                    .on_conflict(apt_sales::id)
                    .do_update()
                    .set((
                        apt_sales::apt_name.eq(excluded(apt_sales::apt_name)),
                        apt_sales::locatadd_nm.eq(excluded(apt_sales::locatadd_nm)),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            Ok(written)
        })
    }

    fn checkpointed<'a>(
        &'a self,
        job: &'a str,
        keys: &'a [String],
        as_of: NaiveDate,
    ) -> BoxFuture<'a, StoreResult<HashSet<String>>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(HashSet::new());
            }
            let mut conn = self.conn().await?;
            let found: Vec<String> = sync_checkpoints::table
                .filter(sync_checkpoints::job.eq(job))
                .filter(sync_checkpoints::as_of.eq(as_of))
                .filter(sync_checkpoints::entity_key.eq_any(keys))
                .select(sync_checkpoints::entity_key)
                .load(&mut conn)
                .await?;
            Ok(found.into_iter().collect())
        })
    }

    fn record_checkpoints<'a>(
        &'a self,
        job: &'a str,
        keys: &'a [String],
        as_of: NaiveDate,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(());
            }
            let rows: Vec<NewSyncCheckpoint<'_>> = keys
                .iter()
                .map(|key| NewSyncCheckpoint {
                    job,
                    entity_key: key,
                    as_of,
                })
                .collect();
            let mut conn = self.conn().await?;
            diesel::insert_into(sync_checkpoints::table)
                .values(&rows)
                .on_conflict((
                    sync_checkpoints::job,
                    sync_checkpoints::entity_key,
                    sync_checkpoints::as_of,
                ))
                .do_update()
                .set(sync_checkpoints::synced_at.eq(diesel::dsl::now))
                .execute(&mut conn)
                .await
                .map_err(StoreError::from)?;
            Ok(())
        })
    }
}
