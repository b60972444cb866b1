use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::build_info;
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    about = "Admission-controlled sync of market and real-estate reference data",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(flatten)]
    pub tuning: TuningArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the environment config, accepted before or after the subcommand.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Requests allowed in flight at once
    #[arg(long = "max-concurrent", global = true)]
    pub max_concurrent: Option<usize>,

    /// Minimum spacing between request starts
    #[arg(long = "min-delay-ms", global = true)]
    pub min_delay_ms: Option<u64>,

    #[arg(long = "max-retries", global = true)]
    pub max_retries: Option<u32>,
    #[arg(long = "retry-initial-ms", global = true)]
    pub retry_initial_ms: Option<u64>,
    #[arg(long = "retry-max-ms", global = true)]
    pub retry_max_ms: Option<u64>,

    /// Abort a one-shot run after this many seconds
    #[arg(long = "timeout-secs", global = true)]
    pub timeout_secs: Option<u64>,

    #[arg(long = "log-level", global = true, default_value = "info")]
    pub log_level: String,

    /// Fetch and report without touching Postgres
    #[arg(long = "dry-run", global = true, default_value_t = false)]
    pub dry_run: bool,
}

impl TuningArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == Some(0) {
            return Err("--max-concurrent must be > 0".to_string());
        }
        if let (Some(initial), Some(max)) = (self.retry_initial_ms, self.retry_max_ms) {
            if max < initial {
                return Err(format!(
                    "--retry-max-ms ({max}) must be >= --retry-initial-ms ({initial})"
                ));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err("--timeout-secs must be > 0".to_string());
        }
        Ok(())
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(value) = self.max_concurrent {
            config.max_concurrent_requests = value;
        }
        if let Some(value) = self.min_delay_ms {
            config.min_request_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.max_retries {
            config.max_retries = value;
        }
        if let Some(value) = self.retry_initial_ms {
            config.initial_retry_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.retry_max_ms {
            config.max_retry_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.timeout_secs {
            config.run_timeout = Some(Duration::from_secs(value));
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP trigger endpoints until SIGTERM/SIGINT
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Sync daily stock quotes
    Prices {
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Restrict managed stocks to one country (KR, US)
        #[arg(long)]
        country: Option<String>,
    },

    /// Sync exchange rates and indices
    ExchangeRates {
        /// Symbols or display names
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
    },

    /// Refresh market listings
    Listings {
        #[arg(long, value_delimiter = ',')]
        markets: Vec<String>,
    },

    /// Sync apartment transactions per region and month
    Transactions {
        #[arg(long, value_delimiter = ',')]
        regions: Vec<String>,
        /// YYYYMM; defaults to the previous and current month
        #[arg(long)]
        period: Option<String>,
        #[arg(long = "max-priority")]
        max_priority: Option<i32>,
    },
}

impl Command {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Serve { .. } => "serve",
            Self::Prices { .. } => "prices",
            Self::ExchangeRates { .. } => "exchange_rates",
            Self::Listings { .. } => "listings",
            Self::Transactions { .. } => "transactions",
        }
    }
}

/// Empty list flags mean "use the stored targets".
pub fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
