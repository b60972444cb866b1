use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prometheus_client::encoding::text::encode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::state::AppState;
use crate::sync_service;

/// Error body shaped as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn unauthorized(detail: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<sync_service::Error> for ApiError {
    fn from(err: sync_service::Error) -> Self {
        if err.is_invalid_request() {
            Self::new(StatusCode::BAD_REQUEST, err.to_string())
        } else {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub(crate) async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub(crate) async fn expose_metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    match encode(&mut buffer, &registry) {
        Ok(()) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            buffer,
        )
            .into_response(),
        Err(err) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Checks `Authorization: Bearer <CRON_SECRET>`.
pub(crate) fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Err(ApiError::unauthorized("Authorization header required"));
    };
    let Some(token) = raw.to_str().ok().and_then(|value| value.strip_prefix("Bearer ")) else {
        return Err(ApiError::unauthorized("Invalid authorization format"));
    };
    match secret {
        Some(secret) if token == secret => Ok(()),
        _ => Err(ApiError::unauthorized("Unauthorized")),
    }
}

pub(crate) async fn require_cron_secret(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match authorize(request.headers(), state.cron_secret.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(
                event = "trigger_rejected",
                path = %request.uri().path(),
                reason = %err.detail,
                "rejected unauthenticated trigger"
            );
            err.into_response()
        }
    }
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {err}")))
}

async fn run_job<T, F>(state: &AppState, job: &'static str, run: F) -> Result<Json<T>, ApiError>
where
    T: Serialize,
    F: Future<Output = Result<T, sync_service::Error>>,
{
    info!(event = "trigger_received", job, "sync triggered over http");
    let outcome = match state.run_timeout {
        Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
            error!(
                event = "trigger_timed_out",
                job,
                timeout_secs = limit.as_secs(),
                "sync run timed out"
            );
            ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("{job} run timed out after {}s", limit.as_secs()),
            )
        })?,
        None => run.await,
    };
    Ok(Json(outcome?))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PriceRequest {
    symbols: Option<Vec<String>>,
    country: Option<String>,
}

pub(crate) async fn update_prices(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: PriceRequest = parse_body(&body)?;
    let service = &state.service;
    let report = run_job(
        &state,
        "prices",
        service.update_prices(request.symbols, request.country.as_deref()),
    )
    .await?;
    Ok(report.into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RateRequest {
    symbols: Option<Vec<String>>,
}

pub(crate) async fn sync_exchange_rates(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: RateRequest = parse_body(&body)?;
    let report = run_job(
        &state,
        "exchange_rates",
        state.service.sync_exchange_rates(request.symbols),
    )
    .await?;
    Ok(report.into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListingRequest {
    markets: Option<Vec<String>>,
}

pub(crate) async fn sync_listings(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ListingRequest = parse_body(&body)?;
    let outcome = run_job(&state, "listings", state.service.sync_listings(request.markets)).await?;
    Ok(outcome.into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionRequest {
    #[serde(alias = "regions")]
    region_codes: Option<Vec<String>>,
    period: Option<String>,
    max_priority: Option<i32>,
}

pub(crate) async fn sync_transactions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: TransactionRequest = parse_body(&body)?;
    let report = run_job(
        &state,
        "transactions",
        state
            .service
            .sync_transactions(request.region_codes, request.period, request.max_priority),
    )
    .await?;
    Ok(report.into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::authorize;
    use crate::server::router;
    use crate::state::AppState;
    use crate::store::MemoryStore;
    use crate::sync_service::test_support::{date, fixture, quote, ScriptedSource};

    const SECRET: &str = "cron-secret";

    fn app_with(today: chrono::NaiveDate) -> (axum::Router, Arc<ScriptedSource>, Arc<MemoryStore>) {
        let fx = fixture(today, &[]);
        let state = AppState::new(Arc::new(fx.service), CancellationToken::new())
            .with_cron_secret(Some(SECRET.to_string()));
        (router(Arc::new(state)), fx.source, fx.store)
    }

    fn post(path: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, token);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn authorization_failures_have_distinct_details() {
        let mut headers = HeaderMap::new();
        let err = authorize(&headers, Some(SECRET)).expect_err("missing header");
        assert_eq!(err.detail, "Authorization header required");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        let err = authorize(&headers, Some(SECRET)).expect_err("wrong scheme");
        assert_eq!(err.detail, "Invalid authorization format");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        let err = authorize(&headers, Some(SECRET)).expect_err("wrong token");
        assert_eq!(err.detail, "Unauthorized");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer cron-secret"));
        assert!(authorize(&headers, None).is_err(), "no secret configured rejects everything");
        assert!(authorize(&headers, Some(SECRET)).is_ok());
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _, _) = app_with(date(2026, 10, 19));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn triggers_require_the_bearer_token() {
        let (app, source, _) = app_with(date(2026, 10, 19));
        let response = app
            .oneshot(post("/update-prices", None, "{}"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["detail"], "Authorization header required");
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn update_prices_returns_the_report() {
        let (app, source, store) = app_with(date(2026, 10, 19));
        source.quote("AAPL", Ok(quote("AAPL", 231.4)));

        let response = app
            .oneshot(post(
                "/update-prices",
                Some("Bearer cron-secret"),
                r#"{"symbols":["aapl"]}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["total"], 1);
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["results"][0]["key"], "AAPL");
        assert_eq!(store.prices().len(), 1);
    }

    #[tokio::test]
    async fn empty_body_uses_stored_targets() {
        let (app, source, _) = app_with(date(2026, 10, 19));

        let response = app
            .oneshot(post("/sync/exchange-rates", Some("Bearer cron-secret"), ""))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["total"], 0);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (app, _, _) = app_with(date(2026, 10, 19));

        let response = app
            .oneshot(post("/sync/listings", Some("Bearer cron-secret"), "{markets:"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_period_is_a_bad_request() {
        let (app, source, _) = app_with(date(2026, 10, 19));

        let response = app
            .oneshot(post(
                "/sync/transactions",
                Some("Bearer cron-secret"),
                r#"{"regionCodes":["11110"],"period":"2026-13"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn planning_failure_is_a_server_error_with_detail() {
        let (app, _, store) = app_with(date(2026, 10, 19));
        store.set_offline(true);

        let response = app
            .oneshot(post("/sync/listings", Some("Bearer cron-secret"), "{}"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(
            body["detail"].as_str().is_some_and(|detail| !detail.is_empty()),
            "{body}"
        );
    }

    #[tokio::test]
    async fn slow_runs_are_cut_off_by_the_run_timeout() {
        let fx = fixture(date(2026, 10, 19), &[]);
        let state = AppState::new(Arc::new(fx.service), CancellationToken::new())
            .with_cron_secret(Some(SECRET.to_string()))
            .with_run_timeout(Some(Duration::from_millis(1)));
        let app = router(Arc::new(state));
        // Retries of an unavailable source outlast a 1ms budget.
        fx.source.listing(
            "NYSE",
            Err(crate::sync_engine::FetchError::new(
                crate::sync_engine::FetchErrorKind::Unavailable,
                "down",
            )),
        );

        let response = app
            .oneshot(post(
                "/sync/listings",
                Some("Bearer cron-secret"),
                r#"{"markets":["NYSE"]}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
