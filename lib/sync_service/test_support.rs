use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::BoxFuture;

use super::{Calendar, SyncService, SyncServiceConfig};
use crate::notify::{NotificationSink, Notifiers};
use crate::source::{ListingEntry, Quote, RatePoint, ReferenceSource, TransactionRecord};
use crate::store::MemoryStore;
use crate::sync_engine::{AdmissionPolicy, FetchError, RetryPolicy};

type Plan<T> = Mutex<HashMap<String, VecDeque<Result<T, FetchError>>>>;

/// Source whose answers are queued per resource key. Unscripted calls fail with `NoData`.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    quotes: Plan<Quote>,
    series: Plan<Vec<RatePoint>>,
    listings: Plan<Vec<ListingEntry>>,
    transactions: Plan<Vec<TransactionRecord>>,
    calls: Mutex<Vec<String>>,
    since: Mutex<HashMap<String, NaiveDate>>,
}

fn push<T>(plan: &Plan<T>, key: &str, outcome: Result<T, FetchError>) {
    plan.lock()
        .expect("plan lock")
        .entry(key.to_string())
        .or_default()
        .push_back(outcome);
}

fn next<T>(plan: &Plan<T>, key: &str) -> Result<T, FetchError> {
    plan.lock()
        .expect("plan lock")
        .get_mut(key)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| Err(FetchError::no_data(format!("nothing scripted for {key}"))))
}

impl ScriptedSource {
    pub(crate) fn quote(&self, symbol: &str, outcome: Result<Quote, FetchError>) -> &Self {
        push(&self.quotes, symbol, outcome);
        self
    }

    pub(crate) fn series(
        &self,
        symbol: &str,
        outcome: Result<Vec<RatePoint>, FetchError>,
    ) -> &Self {
        push(&self.series, symbol, outcome);
        self
    }

    pub(crate) fn listing(
        &self,
        market: &str,
        outcome: Result<Vec<ListingEntry>, FetchError>,
    ) -> &Self {
        push(&self.listings, market, outcome);
        self
    }

    pub(crate) fn transactions(
        &self,
        region_code: &str,
        period: &str,
        outcome: Result<Vec<TransactionRecord>, FetchError>,
    ) -> &Self {
        push(&self.transactions, &format!("{region_code}:{period}"), outcome);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn calls_for(&self, resource: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.as_str() == resource)
            .count()
    }

    pub(crate) fn since_for(&self, symbol: &str) -> Option<NaiveDate> {
        self.since.lock().expect("since lock").get(symbol).copied()
    }

    fn record(&self, resource: String) {
        self.calls.lock().expect("calls lock").push(resource);
    }
}

impl ReferenceSource for ScriptedSource {
    fn fetch_quote<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, Result<Quote, FetchError>> {
        Box::pin(async move {
            self.record(format!("quote:{symbol}"));
            next(&self.quotes, symbol)
        })
    }

    fn fetch_rate_series<'a>(
        &'a self,
        symbol: &'a str,
        since: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<RatePoint>, FetchError>> {
        Box::pin(async move {
            self.record(format!("series:{symbol}"));
            self.since
                .lock()
                .expect("since lock")
                .insert(symbol.to_string(), since);
            next(&self.series, symbol)
        })
    }

    fn fetch_listing<'a>(
        &'a self,
        market: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ListingEntry>, FetchError>> {
        Box::pin(async move {
            self.record(format!("listing:{market}"));
            next(&self.listings, market)
        })
    }

    fn fetch_transactions<'a>(
        &'a self,
        region_code: &'a str,
        period: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TransactionRecord>, FetchError>> {
        Box::pin(async move {
            let key = format!("{region_code}:{period}");
            self.record(format!("transactions:{key}"));
            next(&self.transactions, &key)
        })
    }
}

#[derive(Default)]
pub(crate) struct CollectingNotifier {
    notices: Mutex<Vec<(Option<String>, String)>>,
}

impl CollectingNotifier {
    pub(crate) fn notices(&self) -> Vec<(Option<String>, String)> {
        self.notices.lock().expect("notices lock").clone()
    }
}

impl NotificationSink for CollectingNotifier {
    fn notify(&self, target: Option<&str>, error: &str) {
        self.notices
            .lock()
            .expect("notices lock")
            .push((target.map(str::to_string), error.to_string()));
    }
}

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub(crate) fn quote(symbol: &str, price: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price,
        currency: Some("USD".to_string()),
        name: Some(format!("{symbol} Corp")),
        change_percent: Some(0.5),
    }
}

pub(crate) struct Fixture {
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) source: Arc<ScriptedSource>,
    pub(crate) notifier: Arc<CollectingNotifier>,
    pub(crate) service: SyncService,
}

/// Service over a memory store and a scripted source, with no pacing and millisecond backoff.
pub(crate) fn fixture(today: NaiveDate, stock_symbols: &[&str]) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::default());
    let notifier = Arc::new(CollectingNotifier::default());
    let config = SyncServiceConfig {
        admission: AdmissionPolicy {
            max_concurrent: 2,
            min_interval: Duration::ZERO,
        },
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        stock_symbols: stock_symbols.iter().map(|symbol| symbol.to_string()).collect(),
    };
    let service = SyncService::new(store.clone(), source.clone(), config)
        .with_calendar(Calendar::pinned(today))
        .with_notifiers(Notifiers::Shared(notifier.clone()));

    Fixture {
        store,
        source,
        notifier,
        service,
    }
}
