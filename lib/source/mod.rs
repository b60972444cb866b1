//! Reference data source collaborator and its typed payloads.

mod error_mapping;
pub mod http;

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::Deserialize;

use crate::sync_engine::FetchError;

pub use error_mapping::{map_reqwest_error, map_status};
pub use http::{HttpReferenceSource, HttpSourceConfig};

/// Latest quote for one ticker, after field fallbacks have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub currency: Option<String>,
    pub name: Option<String>,
    pub change_percent: Option<f64>,
}

/// Raw quote body. Providers fill different price and name fields depending on the instrument.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePayload {
    pub symbol: Option<String>,
    pub regular_market_price: Option<f64>,
    pub current_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub currency: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub name: Option<String>,
    pub regular_market_change_percent: Option<f64>,
}

impl QuotePayload {
    /// Price falls back `regularMarketPrice -> currentPrice -> previousClose`; name falls back
    /// `shortName -> longName -> name`. A quote without any price is `NoData`.
    pub fn into_quote(self, requested: &str) -> Result<Quote, FetchError> {
        let price = self
            .regular_market_price
            .or(self.current_price)
            .or(self.previous_close)
            .ok_or_else(|| {
                FetchError::no_data(format!("no price field in quote for {requested}"))
            })?;

        Ok(Quote {
            symbol: self
                .symbol
                .map(|symbol| symbol.to_uppercase())
                .unwrap_or_else(|| requested.to_uppercase()),
            price,
            currency: self.currency,
            name: self.short_name.or(self.long_name).or(self.name),
            change_percent: self.regular_market_change_percent,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePoint {
    pub date: NaiveDate,
    pub close: f64,
    pub adj_close: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    pub symbol: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub asset_type: Option<String>,
}

/// One apartment sale as reported by the transactions endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub apt_name: String,
    /// Ten-thousand-won units, possibly with thousands separators (`"125,000"`).
    pub deal_amount: String,
    /// Exclusive area in square metres; some rows omit it.
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub floor: Option<i32>,
    pub deal_year: i32,
    pub deal_month: u32,
    pub deal_day: u32,
    #[serde(default)]
    pub locatadd_nm: Option<String>,
}

/// External reference data API. Every method is one remote call.
pub trait ReferenceSource: Send + Sync {
    fn fetch_quote<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Quote, FetchError>>;

    /// Daily closes from `since` (inclusive) to the latest available day.
    fn fetch_rate_series<'a>(
        &'a self,
        symbol: &'a str,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<RatePoint>, FetchError>>;

    fn fetch_listing<'a>(
        &'a self,
        market: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ListingEntry>, FetchError>>;

    /// Sales in region `region_code` during `period` (`YYYYMM`).
    fn fetch_transactions<'a>(
        &'a self,
        region_code: &'a str,
        period: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TransactionRecord>, FetchError>>;
}

impl<T> ReferenceSource for Arc<T>
where
    T: ReferenceSource + ?Sized,
{
    fn fetch_quote<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Quote, FetchError>> {
        (**self).fetch_quote(symbol)
    }

    fn fetch_rate_series<'a>(
        &'a self,
        symbol: &'a str,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<RatePoint>, FetchError>> {
        (**self).fetch_rate_series(symbol, since)
    }

    fn fetch_listing<'a>(
        &'a self,
        market: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ListingEntry>, FetchError>> {
        (**self).fetch_listing(market)
    }

    fn fetch_transactions<'a>(
        &'a self,
        region_code: &'a str,
        period: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TransactionRecord>, FetchError>> {
        (**self).fetch_transactions(region_code, period)
    }
}
