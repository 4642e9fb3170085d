//! Process-wide owner of the trained model.
//!
//! [`EngineCache`] builds an [`Engine`] lazily on first access, behind a
//! single-flight guard, and hands out shared references afterwards. A
//! failed build caches nothing, so the failure can be inspected and a later
//! call retries from scratch.

use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{ColumnMapping, EngineConfig};
use crate::error::{EngineError, Result};
use crate::features::build_training_examples;
use crate::forecast;
use crate::loader;
use crate::model::TrainedModel;
use crate::models::{EventRecord, ForecastPoint, HistorySummary, LoadOutcome, LoadReport};
use crate::report;

/// Where the historical table comes from.
pub trait RecordSource {
    fn load(&self) -> Result<LoadOutcome>;
}

impl<F> RecordSource for F
where
    F: Fn() -> Result<LoadOutcome>,
{
    fn load(&self) -> Result<LoadOutcome> {
        self()
    }
}

#[derive(Debug, Clone)]
pub struct CsvSource {
    pub path: PathBuf,
    pub columns: ColumnMapping,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, columns: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }
}

impl RecordSource for CsvSource {
    fn load(&self) -> Result<LoadOutcome> {
        loader::load_csv(&self.path, &self.columns)
    }
}

/// First sheet of an xlsx/xls/ods workbook.
#[derive(Debug, Clone)]
pub struct XlsxSource {
    pub path: PathBuf,
    pub columns: ColumnMapping,
}

impl XlsxSource {
    pub fn new(path: impl Into<PathBuf>, columns: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }
}

impl RecordSource for XlsxSource {
    fn load(&self) -> Result<LoadOutcome> {
        loader::load_workbook(&self.path, &self.columns)
    }
}

/// A file-backed table whose format is picked from the path's extension.
#[derive(Debug, Clone)]
pub enum TableSource {
    Csv(CsvSource),
    Xlsx(XlsxSource),
}

impl TableSource {
    pub fn from_path(path: impl Into<PathBuf>, columns: ColumnMapping) -> Self {
        let path = path.into();
        if loader::is_workbook(&path) {
            TableSource::Xlsx(XlsxSource::new(path, columns))
        } else {
            TableSource::Csv(CsvSource::new(path, columns))
        }
    }
}

impl RecordSource for TableSource {
    fn load(&self) -> Result<LoadOutcome> {
        match self {
            TableSource::Csv(source) => source.load(),
            TableSource::Xlsx(source) => source.load(),
        }
    }
}

/// Cleaned history plus the model trained on it.
#[derive(Debug)]
pub struct Engine {
    records: Vec<EventRecord>,
    load_report: LoadReport,
    model: TrainedModel,
    last_date: NaiveDate,
    config: EngineConfig,
}

impl Engine {
    pub fn initialize(outcome: LoadOutcome, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let LoadOutcome {
            records,
            report: load_report,
        } = outcome;

        let last_date = records
            .iter()
            .map(|record| record.event_date)
            .max()
            .ok_or_else(|| {
                EngineError::DataUnavailable(format!(
                    "no usable records ({} of {} rows skipped)",
                    load_report.skipped(),
                    load_report.rows_read
                ))
            })?;

        let examples = build_training_examples(&records, &config.placeholder);
        let model = TrainedModel::fit(&examples, &config.regression)?;

        info!(
            records = records.len(),
            groups = examples.len(),
            last_date = %last_date,
            "engine ready"
        );

        Ok(Self {
            records,
            load_report,
            model,
            last_date,
            config,
        })
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Forecast over the configured horizon. Recomputed on every call.
    pub fn forecast(&self) -> Result<Vec<ForecastPoint>> {
        self.forecast_with_horizon(self.config.horizon)
    }

    pub fn forecast_with_horizon(&self, horizon: usize) -> Result<Vec<ForecastPoint>> {
        forecast::generate(
            &self.model,
            Some(self.last_date),
            horizon,
            &self.config.placeholder,
        )
    }

    pub fn summary(&self, nationality_match: &str, tail: usize) -> HistorySummary {
        report::summarize(&self.records, nationality_match, tail)
    }
}

pub struct EngineCache<S> {
    source: S,
    config: EngineConfig,
    engine: OnceLock<Engine>,
    build_guard: Mutex<()>,
}

impl<S: RecordSource> EngineCache<S> {
    pub fn new(source: S, config: EngineConfig) -> Self {
        Self {
            source,
            config,
            engine: OnceLock::new(),
            build_guard: Mutex::new(()),
        }
    }

    /// Returns the cached engine, building it on first use. Concurrent first
    /// callers wait for a single build.
    pub fn get(&self) -> Result<&Engine> {
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }

        let _guard = self.build_guard.lock();
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }

        let engine = self
            .source
            .load()
            .and_then(|outcome| Engine::initialize(outcome, self.config.clone()))
            .inspect_err(|err| warn!(error = %err, "engine initialization failed"))?;
        Ok(self.engine.get_or_init(|| engine))
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.get().is_some()
    }
}
