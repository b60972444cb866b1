use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::error_mapping::{map_reqwest_error, map_status};
use super::{ListingEntry, Quote, QuotePayload, RatePoint, ReferenceSource, TransactionRecord};
use crate::sync_engine::{FetchError, FetchErrorKind};

pub type SourceRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Hard cap on requests per second across every caller sharing this source.
    pub rps_limit: u32,
    pub request_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: None,
            rps_limit: 10,
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Deserialize)]
struct SeriesBody {
    points: Vec<RatePoint>,
}

#[derive(Deserialize)]
struct ItemsBody<T> {
    items: Vec<T>,
}

/// Reference source speaking the upstream JSON API.
///
/// The governor limiter sits under every request, retries included, so the upstream never sees
/// more than `rps_limit` calls per second from this process regardless of queue settings.
pub struct HttpReferenceSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    limiter: SourceRateLimiter,
}

impl HttpReferenceSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|err| {
            FetchError::new(
                FetchErrorKind::InvalidInput,
                format!("invalid source base url {}: {err}", config.base_url),
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| map_reqwest_error("client setup", err))?;
        let rps = NonZeroU32::new(config.rps_limit).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                FetchError::new(
                    FetchErrorKind::InvalidInput,
                    format!("source base url {} cannot take a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.limiter.until_ready().await;

        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(resource, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(resource, status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| map_reqwest_error(resource, err))
    }
}

/// Decodes rows one by one; undecodable rows are logged and dropped.
fn decode_rows(resource: &str, items: Vec<Value>) -> Vec<TransactionRecord> {
    let total = items.len();
    let records: Vec<TransactionRecord> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    event = "transaction_row_skipped",
                    resource,
                    error = %err,
                    "skipping undecodable transaction row"
                );
                None
            }
        })
        .collect();
    if records.len() < total {
        warn!(
            event = "transaction_rows_dropped",
            resource,
            dropped = total - records.len(),
            kept = records.len(),
            "dropped undecodable transaction rows"
        );
    }
    records
}

impl ReferenceSource for HttpReferenceSource {
    fn fetch_quote<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Quote, FetchError>> {
        Box::pin(async move {
            let resource = format!("quote {symbol}");
            let url = self.endpoint(&["quote", symbol])?;
            let payload: QuotePayload = self.get_json(&resource, url, &[]).await?;
            payload.into_quote(symbol)
        })
    }

    fn fetch_rate_series<'a>(
        &'a self,
        symbol: &'a str,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<RatePoint>, FetchError>> {
        Box::pin(async move {
            let resource = format!("rate history {symbol}");
            let url = self.endpoint(&["history", symbol])?;
            let start = since.format("%Y-%m-%d").to_string();
            let body: SeriesBody = self
                .get_json(&resource, url, &[("start", start.as_str())])
                .await?;
            Ok(body.points)
        })
    }

    fn fetch_listing<'a>(
        &'a self,
        market: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ListingEntry>, FetchError>> {
        Box::pin(async move {
            let resource = format!("listing {market}");
            let url = self.endpoint(&["listings", market])?;
            let body: ItemsBody<ListingEntry> = self.get_json(&resource, url, &[]).await?;
            if body.items.is_empty() {
                return Err(FetchError::no_data(format!("listing {market} came back empty")));
            }
            Ok(body.items)
        })
    }

    fn fetch_transactions<'a>(
        &'a self,
        region_code: &'a str,
        period: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TransactionRecord>, FetchError>> {
        Box::pin(async move {
            let resource = format!("transactions {region_code}/{period}");
            let url = self.endpoint(&["transactions"])?;
            let body: ItemsBody<Value> = self
                .get_json(&resource, url, &[("region", region_code), ("period", period)])
                .await?;
            Ok(decode_rows(&resource, body.items))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{HttpReferenceSource, HttpSourceConfig};
    use crate::source::ReferenceSource;
    use crate::sync_engine::{Classify, FetchErrorKind};

    fn source_for(server: &MockServer) -> HttpReferenceSource {
        HttpReferenceSource::new(HttpSourceConfig {
            base_url: server.uri(),
            api_key: Some("test-key".to_string()),
            rps_limit: 100,
            request_timeout: Duration::from_secs(2),
        })
        .expect("valid config")
    }

    #[tokio::test]
    async fn quote_is_fetched_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/AAPL"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "AAPL",
                "currentPrice": 189.25,
                "currency": "USD",
                "longName": "Apple Inc."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let quote = source_for(&server).fetch_quote("AAPL").await.expect("quote");
        assert_eq!(quote.price, 189.25);
        assert_eq!(quote.name.as_deref(), Some("Apple Inc."));
        assert_eq!(quote.currency.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn rate_limited_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/MSFT"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_quote("MSFT")
            .await
            .expect_err("429 should fail");
        assert_eq!(err.kind, FetchErrorKind::RateLimited);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/TSLA"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_quote("TSLA")
            .await
            .expect_err("html is not a quote");
        assert_eq!(err.kind, FetchErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn history_passes_start_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/KRW=X"))
            .and(query_param("start", "2026-10-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "points": [
                    {"date": "2026-10-01", "close": 1391.5, "adjClose": 1391.5},
                    {"date": "2026-10-02", "close": 1388.0}
                ]
            })))
            .mount(&server)
            .await;

        let since = NaiveDate::from_ymd_opt(2026, 10, 1).expect("valid date");
        let points = source_for(&server)
            .fetch_rate_series("KRW=X", since)
            .await
            .expect("series");
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].adj_close, None);
    }

    #[tokio::test]
    async fn market_with_slash_is_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/listings/ETF%2FKR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"symbol": "069500", "name": "KODEX 200", "type": "ETF"}]
            })))
            .mount(&server)
            .await;

        let entries = source_for(&server)
            .fetch_listing("ETF/KR")
            .await
            .expect("listing");
        assert_eq!(entries[0].asset_type.as_deref(), Some("ETF"));
    }

    #[tokio::test]
    async fn empty_listing_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/listings/KRX"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_listing("KRX")
            .await
            .expect_err("empty listing is rejected");
        assert_eq!(err.kind, FetchErrorKind::NoData);
    }

    #[tokio::test]
    async fn transaction_rows_without_area_or_floor_are_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions"))
            .and(query_param("region", "11110"))
            .and(query_param("period", "202610"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"aptName": "래미안", "dealAmount": "125,000", "area": 84.97, "floor": 12,
                     "dealYear": 2026, "dealMonth": 10, "dealDay": 3},
                    {"aptName": "경희궁자이", "dealAmount": "98,000",
                     "dealYear": 2026, "dealMonth": 10, "dealDay": 5},
                    {"aptName": "broken", "dealAmount": "1", "dealYear": "soon",
                     "dealMonth": 10, "dealDay": 5}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rows = source_for(&server)
            .fetch_transactions("11110", "202610")
            .await
            .expect("valid rows survive one bad row");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].area, Some(84.97));
        assert_eq!(rows[1].apt_name, "경희궁자이");
        assert_eq!(rows[1].area, None);
        assert_eq!(rows[1].floor, None);
    }
}
