use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// One cleaned separation record. Only rows whose date parsed make it here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub event_date: NaiveDate,
    pub department: Option<String>,
    pub nationality: Option<String>,
}

impl EventRecord {
    pub fn new(
        event_date: NaiveDate,
        department: impl Into<String>,
        nationality: impl Into<String>,
    ) -> Self {
        Self {
            event_date,
            department: Some(department.into()),
            nationality: Some(nationality.into()),
        }
    }

    pub fn year(&self) -> i32 {
        self.event_date.year()
    }

    pub fn month(&self) -> u32 {
        self.event_date.month()
    }
}

/// Feature row fed to the encoder. Doubles as the aggregation key
/// (year, month, department, nationality) when grouping history.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FeatureRow {
    pub year: i32,
    pub month: u32,
    pub department: String,
    pub nationality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    pub features: FeatureRow,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    /// Period label, `YYYY-MM`.
    pub period: String,
    pub period_start: NaiveDate,
    pub predicted_count: u64,
    /// Unrounded model output for the period.
    pub expected_count: f64,
}

/// Row-level diagnostics from a load. Skipped rows are never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub skipped_unparseable_date: usize,
    pub skipped_malformed: usize,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.skipped_unparseable_date + self.skipped_malformed
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub records: Vec<EventRecord>,
    pub report: LoadReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub total_records: usize,
    pub top_department: Option<String>,
    pub nationality_match: String,
    pub matching_nationality: usize,
    pub matching_share_pct: f64,
    pub recent: Vec<EventRecord>,
}
