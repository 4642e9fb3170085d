use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_HORIZON: usize = 6;
pub const DEFAULT_PLACEHOLDER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// L2 penalty on the coefficients; the intercept is not penalized.
    pub alpha: f64,
    pub max_iter: usize,
    /// Convergence threshold on the largest absolute gradient component.
    pub tol: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            max_iter: 100,
            tol: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub regression: RegressionConfig,
    pub horizon: usize,
    /// Stand-in for missing categories and for the category-agnostic forecast row.
    pub placeholder: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            regression: RegressionConfig::default(),
            horizon: DEFAULT_HORIZON,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            EngineError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|err| {
            EngineError::InvalidConfig(format!("cannot parse {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let reg = &self.regression;
        if !reg.alpha.is_finite() || reg.alpha <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "alpha must be a positive number, got {}",
                reg.alpha
            )));
        }
        if !reg.tol.is_finite() || reg.tol <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "tol must be a positive number, got {}",
                reg.tol
            )));
        }
        if reg.max_iter == 0 {
            return Err(EngineError::InvalidConfig("max_iter must be at least 1".into()));
        }
        if self.horizon == 0 {
            return Err(EngineError::InvalidConfig("horizon must be at least 1".into()));
        }
        if self.placeholder.trim().is_empty() {
            return Err(EngineError::InvalidConfig("placeholder must not be blank".into()));
        }
        Ok(())
    }
}

/// Header names of the source table. Owned by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub date: String,
    pub department: String,
    pub nationality: String,
    pub delimiter: u8,
    /// Encoding label for text cells that are not valid UTF-8.
    pub fallback_encoding: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            date: "event_date".to_string(),
            department: "department".to_string(),
            nationality: "nationality".to_string(),
            delimiter: b',',
            fallback_encoding: "windows-1256".to_string(),
        }
    }
}
