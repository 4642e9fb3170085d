//! Monthly separation forecasting from a historical event log.
//!
//! The pipeline loads and cleans the history ([`loader`]), groups it into
//! monthly counts per department and nationality ([`features`]), one-hot
//! encodes the categories ([`encoder`]), fits a penalized Poisson regression
//! ([`regression`]) and projects the months after the last observation
//! ([`forecast`]). [`engine::EngineCache`] owns the trained result for the
//! life of the process.

pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod features;
pub mod forecast;
pub mod loader;
pub mod model;
pub mod models;
pub mod regression;
pub mod report;

pub use config::{ColumnMapping, EngineConfig, RegressionConfig};
pub use engine::{CsvSource, Engine, EngineCache, RecordSource, TableSource, XlsxSource};
pub use error::{EngineError, Result};
pub use model::TrainedModel;
pub use models::{EventRecord, FeatureRow, ForecastPoint, HistorySummary, LoadOutcome, LoadReport};
