use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use diesel_async::pooled_connection::deadpool::BuildError;
use dotenv::dotenv;
use serde::Serialize;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::cli::{non_empty, Cli, Command};
use crate::config::{Config, ConfigError};
use crate::db::{build_db_pool, run_migrations, MigrationError};
use crate::logging::{format_error_report, init_logging, SERVICE_NAME};
use crate::notify::Notifiers;
use crate::server::setup_server_with_addr;
use crate::source::{HttpReferenceSource, HttpSourceConfig};
use crate::state::AppState;
use crate::store::{MemoryStore, PgStore, ReferenceStore};
use crate::sync_engine::FetchError;
use crate::sync_service::{self, SyncService, SyncServiceConfig};

/// Connections beyond the request budget for existence queries and upserts.
const DB_POOL_HEADROOM: usize = 2;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to apply migrations")]
    Migrations(#[source] MigrationError),

    #[error("failed to build db pool")]
    Pool(#[from] BuildError),

    #[error("failed to set up reference source")]
    Source(#[from] FetchError),
}

/// Runs a parsed command line and returns the process exit code.
///
/// `0` ok, `1` run failure, `2` invalid arguments or configuration.
pub async fn run(cli: Cli) -> i32 {
    dotenv().ok();

    let logging_context = init_logging(SERVICE_NAME, cli.command.mode(), &cli.tuning.log_level);
    let run_span = logging_context.run_span();
    run_command(cli).instrument(run_span).await
}

async fn run_command(cli: Cli) -> i32 {
    if let Err(err) = cli.tuning.validate() {
        eprintln!("{err}");
        return 2;
    }
    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let service = match build_service(&config, cli.tuning.dry_run).await {
        Ok(service) => service,
        Err(StartupError::Config(err)) => {
            eprintln!("{err}");
            return 2;
        }
        Err(err) => return report_failure("sync_worker_startup_failed", "startup failed", &err),
    };
    let timeout = config.run_timeout;

    match cli.command {
        Command::Serve { .. } => serve(service, &config).await,
        Command::Prices { symbols, country } => {
            run_once(
                "prices",
                timeout,
                service.update_prices(non_empty(&symbols), country.as_deref()),
            )
            .await
        }
        Command::ExchangeRates { symbols } => {
            run_once(
                "exchange_rates",
                timeout,
                service.sync_exchange_rates(non_empty(&symbols)),
            )
            .await
        }
        Command::Listings { markets } => {
            run_once("listings", timeout, service.sync_listings(non_empty(&markets))).await
        }
        Command::Transactions {
            regions,
            period,
            max_priority,
        } => {
            run_once(
                "transactions",
                timeout,
                service.sync_transactions(non_empty(&regions), period, max_priority),
            )
            .await
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = Config::from_env()?;
    cli.tuning.apply(&mut config);
    if let Command::Serve { bind: Some(addr) } = &cli.command {
        config.bind_addr = *addr;
    }
    config.validate()?;
    Ok(config)
}

/// Wires the store, source and notifiers. Dry runs use an empty in-memory store.
pub async fn build_service(config: &Config, dry_run: bool) -> Result<SyncService, StartupError> {
    let store: Arc<dyn ReferenceStore> = if dry_run {
        warn!(event = "dry_run_enabled", "dry run: writes go to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let db_url = config.require_db_url()?;
        let applied = run_migrations(db_url)
            .await
            .map_err(StartupError::Migrations)?;
        info!(event = "migrations_applied", applied, "database schema is current");
        let pool_size = config
            .max_concurrent_requests
            .saturating_add(DB_POOL_HEADROOM);
        let pool = build_db_pool(db_url, pool_size).await?;
        Arc::new(PgStore::new(pool))
    };

    let source = HttpReferenceSource::new(HttpSourceConfig {
        base_url: config.source_api_url.clone(),
        api_key: config.source_api_key.clone(),
        rps_limit: config.source_rps_limit,
        ..HttpSourceConfig::default()
    })?;

    let service = SyncService::new(
        store,
        Arc::new(source),
        SyncServiceConfig {
            admission: config.admission_policy(),
            retry: config.retry_policy(),
            stock_symbols: config.stock_symbols.clone(),
        },
    )
    .with_notifiers(Notifiers::from_webhook(config.slack_webhook_url.as_deref()));

    // The rate job reloads the cache on its own, so a cold cache is not fatal.
    if let Err(err) = service.refresh_symbols().await {
        warn!(
            event = "symbol_cache_load_failed",
            error = %err,
            "starting with an empty symbol cache"
        );
    }
    Ok(service)
}

/// Runs one job, prints its JSON summary to stdout and maps the outcome to an exit code.
pub async fn run_once<T, F>(job: &'static str, timeout: Option<Duration>, run: F) -> i32
where
    T: Serialize,
    F: Future<Output = Result<T, sync_service::Error>>,
{
    info!(event = "sync_job_starting", job, "starting one-shot sync");
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    event = "sync_job_timed_out",
                    job,
                    timeout_secs = limit.as_secs(),
                    "sync run timed out"
                );
                eprintln!("{job} run timed out after {}s", limit.as_secs());
                return 1;
            }
        },
        None => run.await,
    };

    match outcome {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(rendered) => {
                println!("{rendered}");
                info!(event = "sync_job_complete", job, "one-shot sync completed");
                0
            }
            Err(err) => report_failure(
                "sync_summary_encode_failed",
                "could not encode summary",
                &err,
            ),
        },
        Err(err) if err.is_invalid_request() => {
            eprintln!("{err}");
            2
        }
        Err(err) => report_failure("sync_job_failed", "sync run failed", &err),
    }
}

async fn serve(service: SyncService, config: &Config) -> i32 {
    if config.cron_secret.is_none() {
        warn!(
            event = "cron_secret_missing",
            "CRON_SECRET is unset; every trigger request will be rejected"
        );
    }
    let state = Arc::new(
        AppState::new(Arc::new(service), CancellationToken::new())
            .with_cron_secret(config.cron_secret.clone())
            .with_run_timeout(config.run_timeout),
    );
    let server_handle = match setup_server_with_addr(Arc::clone(&state), config.bind_addr).await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("failed to bind {}", config.bind_addr);
            return report_failure("http_server_start_failed", "failed to start http server", &err);
        }
    };

    tokio::spawn(handle_shutdown_signals(state.shutdown_token.clone()));

    if let Err(err) = server_handle.await {
        return report_failure("http_server_task_failed", "http server task panicked", &err);
    }
    info!(event = "sync_worker_stopped", "http server drained, exiting");
    0
}

/// Cancels `token` on SIGTERM or SIGINT.
pub async fn handle_shutdown_signals(token: CancellationToken) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(err), _) | (_, Err(err)) => {
            error!(
                event = "signal_handler_failed",
                error = %err,
                "cannot listen for shutdown signals"
            );
            token.cancel();
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down"),
        _ = sigint.recv() => info!(event = "shutdown_signal", signal = "SIGINT", "shutting down"),
    }
    token.cancel();
}

fn report_failure(event: &'static str, message: &str, err: &(dyn StdError + 'static)) -> i32 {
    let error_report = format_error_report(err);
    error!(
        event,
        error = %err,
        error_debug = ?err,
        error_report = %error_report,
        "{message}"
    );
    eprintln!("{message}: {err}");
    eprintln!("{error_report}");
    1
}
