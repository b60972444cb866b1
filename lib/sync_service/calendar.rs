use chrono::{Duration, NaiveDate, Utc};

/// Korea Standard Time has no DST, so a fixed +9h shift is exact.
const KST_OFFSET_HOURS: i64 = 9;

/// "Today" as the jobs see it: the KST calendar date, optionally pinned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calendar {
    pinned: Option<NaiveDate>,
}

impl Calendar {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn pinned(today: NaiveDate) -> Self {
        Self {
            pinned: Some(today),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.pinned.unwrap_or_else(|| {
            (Utc::now().naive_utc() + Duration::hours(KST_OFFSET_HOURS)).date()
        })
    }

    pub fn yesterday(&self) -> NaiveDate {
        let today = self.today();
        today.pred_opt().unwrap_or(today)
    }

    pub fn days_ago(&self, days: i64) -> NaiveDate {
        self.today() - Duration::days(days)
    }

    /// `YYYYMM` for thirty days ago and for the current month, without repeats.
    pub fn recent_periods(&self) -> Vec<String> {
        let previous = self.days_ago(30).format("%Y%m").to_string();
        let current = self.today().format("%Y%m").to_string();
        if previous == current {
            vec![current]
        } else {
            vec![previous, current]
        }
    }
}
