use std::collections::BTreeMap;

use crate::models::{EventRecord, FeatureRow, TrainingExample};

/// One training example per observed (year, month, department, nationality)
/// group, with the number of records in that group as the target.
///
/// Missing categories are replaced by `placeholder` before grouping so the
/// record still counts. Output is ordered by key.
pub fn build_training_examples(records: &[EventRecord], placeholder: &str) -> Vec<TrainingExample> {
    let mut groups: BTreeMap<FeatureRow, u64> = BTreeMap::new();

    for record in records {
        let key = FeatureRow {
            year: record.year(),
            month: record.month(),
            department: record
                .department
                .clone()
                .unwrap_or_else(|| placeholder.to_string()),
            nationality: record
                .nationality
                .clone()
                .unwrap_or_else(|| placeholder.to_string()),
        };
        *groups.entry(key).or_insert(0) += 1;
    }

    groups
        .into_iter()
        .map(|(features, count)| TrainingExample { features, count })
        .collect()
}

/// Synthetic category-agnostic row used to query a future period.
pub fn placeholder_row(year: i32, month: u32, placeholder: &str) -> FeatureRow {
    FeatureRow {
        year,
        month,
        department: placeholder.to_string(),
        nationality: placeholder.to_string(),
    }
}
