use chrono::{Datelike, Months, NaiveDate};

use crate::error::{EngineError, Result};
use crate::features::placeholder_row;
use crate::model::TrainedModel;
use crate::models::ForecastPoint;

/// Projects `horizon` consecutive calendar months, starting with the month
/// after `last_date`, using a category-agnostic row per period.
pub fn generate(
    model: &TrainedModel,
    last_date: Option<NaiveDate>,
    horizon: usize,
    placeholder: &str,
) -> Result<Vec<ForecastPoint>> {
    let last_date =
        last_date.ok_or_else(|| EngineError::Forecast("no last observed date".into()))?;
    if horizon == 0 {
        return Err(EngineError::Forecast("horizon must be at least 1".into()));
    }

    let mut period_start = first_of_next_month(last_date).ok_or_else(|| {
        EngineError::Forecast(format!("no calendar month follows {last_date}"))
    })?;
    let mut points = Vec::with_capacity(horizon);

    for step in 0..horizon {
        let label = period_label(period_start);
        let row = placeholder_row(period_start.year(), period_start.month(), placeholder);
        let expected = model.predict(&row)?;
        if !expected.is_finite() || expected < 0.0 {
            return Err(EngineError::Forecast(format!(
                "model produced {expected} for {label}"
            )));
        }

        points.push(ForecastPoint {
            period: label,
            period_start,
            predicted_count: expected.round() as u64,
            expected_count: expected,
        });

        if step + 1 < horizon {
            period_start = period_start
                .checked_add_months(Months::new(1))
                .ok_or_else(|| EngineError::Forecast("forecast ran past the calendar".into()))?;
        }
    }

    Ok(points)
}

pub fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.checked_add_months(Months::new(1))
}

pub fn period_label(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}
