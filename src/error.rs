use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Source table missing, unreadable, or empty after cleaning.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// The count regression could not be fitted.
    #[error("model training failed: {0}")]
    ModelTraining(String),

    /// A single forecast request could not be served. The cached model is unaffected.
    #[error("forecast unavailable: {0}")]
    Forecast(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EngineError {
    /// Whether the engine must refuse to serve after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::Forecast(_) | EngineError::DimensionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let err = EngineError::DataUnavailable("no rows".to_string());
        assert_eq!(err.to_string(), "data unavailable: no rows");
        let err = EngineError::ModelTraining("singular".to_string());
        assert_eq!(err.to_string(), "model training failed: singular");
    }

    #[test]
    fn only_forecast_errors_are_recoverable() {
        assert!(EngineError::DataUnavailable(String::new()).is_fatal());
        assert!(EngineError::ModelTraining(String::new()).is_fatal());
        assert!(EngineError::InvalidConfig(String::new()).is_fatal());
        assert!(!EngineError::Forecast(String::new()).is_fatal());
    }
}
