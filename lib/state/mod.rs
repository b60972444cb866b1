use std::sync::Arc;
use std::time::Duration;

use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::sync_service::SyncService;

pub struct AppState {
    pub service: Arc<SyncService>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
    /// Bearer token the trigger routes expect. `None` rejects every trigger.
    pub cron_secret: Option<String>,
    /// Upper bound for one triggered run.
    pub run_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(service: Arc<SyncService>, shutdown_token: CancellationToken) -> Self {
        Self {
            service,
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
            cron_secret: None,
            run_timeout: None,
        }
    }

    pub fn with_cron_secret(mut self, secret: Option<String>) -> Self {
        self.cron_secret = secret;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }
}
