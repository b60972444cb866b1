use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use super::{Error, SyncService};
use crate::db::models::AptSale;
use crate::source::{ReferenceSource, TransactionRecord};
use crate::store::{ReferenceStore, StoreError};
use crate::sync_engine::{
    record_identity, resolve_targets, FetchError, PersistError, PlanningError, RecordWriter,
    SyncBinding, SyncReport, WriteMode,
};

const JOB: &str = "transactions";

/// Only the most important regions are synced unless the caller widens it.
pub const DEFAULT_REGION_PRIORITY: i32 = 1;

/// One region code in one `YYYYMM` month.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPeriod {
    pub region_code: String,
    pub period: String,
}

impl RegionPeriod {
    pub fn new(region_code: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            region_code: region_code.into(),
            period: period.into(),
        }
    }
}

impl fmt::Display for RegionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.region_code, self.period)
    }
}

impl Serialize for RegionPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn validate_period(period: &str) -> Result<String, Error> {
    let period = period.trim();
    let month = period.get(4..).and_then(|month| month.parse::<u32>().ok());
    let well_formed = period.len() == 6
        && period.bytes().all(|byte| byte.is_ascii_digit())
        && month.is_some_and(|month| (1..=12).contains(&month));
    if well_formed {
        Ok(period.to_string())
    } else {
        Err(Error::InvalidRequest(format!(
            "period must be YYYYMM, got {period:?}"
        )))
    }
}

/// Amounts arrive in ten-thousand-won units with thousands separators.
fn parse_deal_amount(raw: &str) -> Option<i64> {
    raw.chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect::<String>()
        .parse()
        .ok()
}

/// Renders whole floats with one decimal (`84.0`, not `84`).
fn decimal_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// `lawd_code _ apt_name _ amount _ area _ floor _ date`, with missing area and floor as zero.
fn identity_parts(
    region_code: &str,
    apt_name: &str,
    deal_amount: i64,
    area: Option<f64>,
    floor: Option<i32>,
    deal_date: NaiveDate,
) -> [String; 6] {
    [
        region_code.to_string(),
        apt_name.to_string(),
        deal_amount.to_string(),
        decimal_float(area.unwrap_or(0.0)),
        floor.unwrap_or(0).to_string(),
        deal_date.format("%Y-%m-%d").to_string(),
    ]
}

fn to_sale(
    region_code: &str,
    region_name: Option<&str>,
    record: TransactionRecord,
) -> Option<AptSale> {
    let apt_name = record.apt_name.trim().to_string();
    let deal_amount = parse_deal_amount(&record.deal_amount)?;
    let deal_date = NaiveDate::from_ymd_opt(record.deal_year, record.deal_month, record.deal_day)?;
    if apt_name.is_empty() {
        return None;
    }

    let id = record_identity(identity_parts(
        region_code,
        &apt_name,
        deal_amount,
        record.area,
        record.floor,
        deal_date,
    ));
    Some(AptSale {
        id,
        apt_name,
        area: record.area,
        floor: record.floor,
        deal_amount,
        deal_date,
        deal_year: record.deal_year,
        deal_month: record.deal_month as i32,
        deal_day: record.deal_day as i32,
        lawd_code: region_code.to_string(),
        locatadd_nm: record
            .locatadd_nm
            .filter(|name| !name.trim().is_empty())
            .or_else(|| region_name.map(str::to_string)),
    })
}

struct TransactionBinding {
    store: Arc<dyn ReferenceStore>,
    source: Arc<dyn ReferenceSource>,
    today: NaiveDate,
    region_names: HashMap<String, String>,
}

fn checkpoint_keys(keys: &[RegionPeriod]) -> Vec<String> {
    keys.iter().map(RegionPeriod::to_string).collect()
}

impl RecordWriter for TransactionBinding {
    type Record = AptSale;

    fn upsert<'a>(&'a self, records: &'a [AptSale]) -> BoxFuture<'a, Result<usize, PersistError>> {
        Box::pin(async move { Ok(self.store.upsert_apt_sales(records).await?) })
    }
}

impl SyncBinding for TransactionBinding {
    type Key = RegionPeriod;

    fn job(&self) -> &'static str {
        JOB
    }

    fn existing_keys<'a>(
        &'a self,
        targets: &'a [RegionPeriod],
    ) -> BoxFuture<'a, Result<HashSet<RegionPeriod>, PlanningError>> {
        Box::pin(async move {
            let done = self
                .store
                .checkpointed(JOB, &checkpoint_keys(targets), self.today)
                .await
                .map_err(StoreError::into_existence_error)?;
            Ok(targets
                .iter()
                .filter(|key| done.contains(&key.to_string()))
                .cloned()
                .collect())
        })
    }

    fn fetch<'a>(
        &'a self,
        key: &'a RegionPeriod,
    ) -> BoxFuture<'a, Result<Vec<AptSale>, FetchError>> {
        Box::pin(async move {
            let records = self
                .source
                .fetch_transactions(&key.region_code, &key.period)
                .await?;
            let received = records.len();
            let region_name = self.region_names.get(&key.region_code).map(String::as_str);
            let sales: Vec<AptSale> = records
                .into_iter()
                .filter_map(|record| to_sale(&key.region_code, region_name, record))
                .collect();
            if sales.len() < received {
                warn!(
                    event = "transaction_rows_skipped",
                    key = %key,
                    skipped = received - sales.len(),
                    "dropped unparseable transaction rows"
                );
            }
            Ok(sales)
        })
    }

    fn mark_synced<'a>(
        &'a self,
        keys: &'a [RegionPeriod],
    ) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            Ok(self
                .store
                .record_checkpoints(JOB, &checkpoint_keys(keys), self.today)
                .await?)
        })
    }
}

impl SyncService {
    /// Syncs apartment sales for every region × month pair.
    ///
    /// Regions default to the stored codes with `priority <= max_priority` (default
    /// [`DEFAULT_REGION_PRIORITY`]); `period` defaults to last month and this month.
    pub async fn sync_transactions(
        &self,
        region_codes: Option<Vec<String>>,
        period: Option<String>,
        max_priority: Option<i32>,
    ) -> Result<SyncReport<RegionPeriod>, Error> {
        let result = self.run_transactions(region_codes, period, max_priority).await;
        if let Err(err) = &result {
            self.report_batch_failure(JOB, err);
        }
        result
    }

    async fn run_transactions(
        &self,
        region_codes: Option<Vec<String>>,
        period: Option<String>,
        max_priority: Option<i32>,
    ) -> Result<SyncReport<RegionPeriod>, Error> {
        let periods = match period {
            Some(period) => vec![validate_period(&period)?],
            None => self.calendar.recent_periods(),
        };
        let explicit = region_codes.map(|codes| {
            codes
                .into_iter()
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .collect::<Vec<_>>()
        });
        let max_priority = max_priority.unwrap_or(DEFAULT_REGION_PRIORITY);

        let mut region_names: HashMap<String, String> = HashMap::new();
        let names = &mut region_names;
        let store = Arc::clone(&self.store);
        let resolved = resolve_targets(explicit, &[], move || async move {
            let rows = store.region_codes(Some(max_priority)).await?;
            let mut codes = Vec::with_capacity(rows.len());
            for row in rows {
                codes.push(row.code.clone());
                names.insert(row.code, row.name);
            }
            Ok::<_, StoreError>(codes)
        })
        .await?;

        if region_names.is_empty() && !resolved.keys.is_empty() {
            let rows = self
                .store
                .region_codes(None)
                .await
                .map_err(|err| PlanningError::TargetResolution(err.to_string()))?;
            region_names.extend(rows.into_iter().map(|row| (row.code, row.name)));
        }

        let targets: Vec<RegionPeriod> = resolved
            .keys
            .iter()
            .flat_map(|code| {
                periods
                    .iter()
                    .map(move |period| RegionPeriod::new(code.clone(), period.clone()))
            })
            .collect();
        info!(
            event = "transaction_targets_resolved",
            origin = resolved.origin.as_str(),
            regions = resolved.keys.len(),
            periods = periods.len(),
            max_priority,
            "resolved transaction targets"
        );

        let binding = TransactionBinding {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            today: self.calendar.today(),
            region_names,
        };
        Ok(self
            .orchestrator(binding, WriteMode::Merged)
            .run(targets)
            .await?)
    }
}
