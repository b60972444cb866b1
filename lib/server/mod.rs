pub mod monitoring;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tracing::{error, info};

use crate::state::AppState;

pub use routes::ApiError;

/// Public health and metrics routes plus the bearer-protected sync triggers.
pub fn router(state: Arc<AppState>) -> Router {
    let triggers = Router::new()
        .route("/update-prices", post(routes::update_prices))
        .route("/sync/exchange-rates", post(routes::sync_exchange_rates))
        .route("/sync/listings", post(routes::sync_listings))
        .route("/sync/transactions", post(routes::sync_transactions))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            routes::require_cron_secret,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::expose_metrics))
        .merge(triggers)
        .with_state(state)
}

/// Registers metrics, binds `addr` and serves until the shutdown token fires.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    {
        let mut registry = state.registry.write().await;
        monitoring::register_metrics(&mut registry).await;
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "http_server_listening", bind = %addr, "serving sync triggers");
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            error!(event = "http_server_failed", error = %err, "http server stopped with an error");
        }
    });

    Ok(server_handle)
}
