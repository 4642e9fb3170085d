use serde::Serialize;
use tracing::info;

use crate::config::RegressionConfig;
use crate::encoder::CategoricalEncoder;
use crate::error::{EngineError, Result};
use crate::models::{FeatureRow, TrainingExample};
use crate::regression::{FittedPoisson, PoissonRegressor};

/// Fitted encoder and regression. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainedModel {
    encoder: CategoricalEncoder,
    regression: FittedPoisson,
}

impl TrainedModel {
    pub fn fit(examples: &[TrainingExample], config: &RegressionConfig) -> Result<Self> {
        if examples.is_empty() {
            return Err(EngineError::ModelTraining("no training examples".into()));
        }

        let encoder = CategoricalEncoder::fit(examples);
        let design = encoder.transform_all(examples.iter().map(|e| &e.features));
        let targets: Vec<f64> = examples.iter().map(|e| e.count as f64).collect();
        let regression = PoissonRegressor::new(config.clone()).fit(&design, &targets)?;

        info!(
            examples = examples.len(),
            features = encoder.width(),
            alpha = regression.alpha(),
            iterations = regression.iterations(),
            converged = regression.converged(),
            deviance = regression.mean_deviance(),
            "trained separation model"
        );

        Ok(Self {
            encoder,
            regression,
        })
    }

    pub fn encoder(&self) -> &CategoricalEncoder {
        &self.encoder
    }

    pub fn regression(&self) -> &FittedPoisson {
        &self.regression
    }

    /// Expected count for one feature row. Unseen categories are tolerated.
    pub fn predict(&self, row: &FeatureRow) -> Result<f64> {
        self.regression.predict(&self.encoder.transform(row))
    }
}
