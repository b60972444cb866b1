use chrono::NaiveDate;
use diesel::prelude::*;

use crate::sync_engine::NaturalKey;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = super::schema::managed_stocks)]
pub struct ManagedStock {
    pub symbol: String,
    pub country: String,
    pub enabled: bool,
}

/// Daily closing quote, one row per `(symbol, date)`.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::stock_prices)]
pub struct StockPrice {
    pub symbol: String,
    pub date: NaiveDate,
    pub close_price: f64,
    pub currency: Option<String>,
    pub name: Option<String>,
    pub change_percent: Option<f64>,
}

impl NaturalKey for StockPrice {
    type Key = (String, NaiveDate);

    fn natural_key(&self) -> Self::Key {
        (self.symbol.clone(), self.date)
    }
}

/// Exchange rate or index tracked by the rates job.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = super::schema::rate_symbols)]
pub struct RateSymbol {
    pub symbol: String,
    /// Display name; the rates job also accepts it in place of the symbol.
    pub name: String,
    pub currency: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::exchange_rates)]
pub struct ExchangeRate {
    pub symbol: String,
    pub date: NaiveDate,
    pub close_price: f64,
    pub adj_close_price: Option<f64>,
    pub currency: Option<String>,
    pub name: Option<String>,
}

impl NaturalKey for ExchangeRate {
    type Key = (String, NaiveDate);

    fn natural_key(&self) -> Self::Key {
        (self.symbol.clone(), self.date)
    }
}

/// One listed instrument from a market listing.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::stock_names)]
pub struct StockName {
    pub symbol: String,
    pub name: String,
    pub country: String,
    pub source: String,
    pub is_active: bool,
    pub asset_type: Option<String>,
}

impl NaturalKey for StockName {
    type Key = String;

    fn natural_key(&self) -> String {
        self.symbol.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = super::schema::region_codes)]
pub struct RegionCode {
    pub code: String,
    pub name: String,
    /// Lower is more important; the transactions job defaults to priority 1 only.
    pub priority: i32,
}

/// Apartment sale record. `id` is a content hash of the identifying fields.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = super::schema::apt_sales)]
pub struct AptSale {
    pub id: String,
    pub apt_name: String,
    pub area: Option<f64>,
    pub floor: Option<i32>,
    pub deal_amount: i64,
    pub deal_date: NaiveDate,
    pub deal_year: i32,
    pub deal_month: i32,
    pub deal_day: i32,
    pub lawd_code: String,
    pub locatadd_nm: Option<String>,
}

impl NaturalKey for AptSale {
    type Key = String;

    fn natural_key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = super::schema::sync_checkpoints)]
pub struct NewSyncCheckpoint<'a> {
    pub job: &'a str,
    pub entity_key: &'a str,
    pub as_of: NaiveDate,
}
