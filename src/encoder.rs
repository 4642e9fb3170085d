//! One-hot encoding of the categorical fields with numeric passthrough.
//!
//! Column layout: department indicators, nationality indicators, then
//! `year` and `month` as raw numbers. Categories are enumerated in sorted
//! order. Values outside the fitted vocabulary encode as all zeros.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{FeatureRow, TrainingExample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoricalField {
    Department,
    Nationality,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Vocabulary {
    values: Vec<String>,
}

impl Vocabulary {
    fn from_values<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let unique: BTreeSet<&str> = values.collect();
        Self {
            values: unique.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn position(&self, value: &str) -> Option<usize> {
        self.values
            .binary_search_by(|candidate| candidate.as_str().cmp(value))
            .ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoricalEncoder {
    departments: Vocabulary,
    nationalities: Vocabulary,
}

impl CategoricalEncoder {
    pub fn fit(examples: &[TrainingExample]) -> Self {
        Self {
            departments: Vocabulary::from_values(
                examples.iter().map(|e| e.features.department.as_str()),
            ),
            nationalities: Vocabulary::from_values(
                examples.iter().map(|e| e.features.nationality.as_str()),
            ),
        }
    }

    pub fn vocabulary(&self, field: CategoricalField) -> &Vocabulary {
        match field {
            CategoricalField::Department => &self.departments,
            CategoricalField::Nationality => &self.nationalities,
        }
    }

    /// Encoded row width: both indicator blocks plus year and month.
    pub fn width(&self) -> usize {
        self.departments.len() + self.nationalities.len() + 2
    }

    /// Indicator block for a single field. Unseen values give the zero vector.
    pub fn indicator(&self, field: CategoricalField, value: &str) -> Vec<f64> {
        let vocabulary = self.vocabulary(field);
        let mut block = vec![0.0; vocabulary.len()];
        if let Some(idx) = vocabulary.position(value) {
            block[idx] = 1.0;
        }
        block
    }

    pub fn transform(&self, row: &FeatureRow) -> Vec<f64> {
        let mut encoded = Vec::with_capacity(self.width());
        encoded.extend(self.indicator(CategoricalField::Department, &row.department));
        encoded.extend(self.indicator(CategoricalField::Nationality, &row.nationality));
        encoded.push(f64::from(row.year));
        encoded.push(f64::from(row.month));
        encoded
    }

    pub fn transform_all<'a>(&self, rows: impl IntoIterator<Item = &'a FeatureRow>) -> Vec<Vec<f64>> {
        rows.into_iter().map(|row| self.transform(row)).collect()
    }
}
