use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{EventRecord, ForecastPoint, HistorySummary};

pub const DEFAULT_NATIONALITY_MATCH: &str = "Saudi";
pub const DEFAULT_TAIL: usize = 10;

pub fn summarize(records: &[EventRecord], nationality_match: &str, tail: usize) -> HistorySummary {
    let matching_nationality = records
        .iter()
        .filter(|record| {
            record
                .nationality
                .as_deref()
                .is_some_and(|value| value.contains(nationality_match))
        })
        .count();

    let matching_share_pct = if records.is_empty() {
        0.0
    } else {
        matching_nationality as f64 / records.len() as f64 * 100.0
    };

    HistorySummary {
        total_records: records.len(),
        top_department: top_department(records),
        nationality_match: nationality_match.to_string(),
        matching_nationality,
        matching_share_pct,
        recent: records[records.len().saturating_sub(tail)..].to_vec(),
    }
}

/// Most frequent department, ignoring missing values. Ties go to the
/// alphabetically first name.
pub fn top_department(records: &[EventRecord]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for department in records.iter().filter_map(|r| r.department.as_deref()) {
        *counts.entry(department).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (department, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((department, count));
        }
    }
    best.map(|(department, _)| department.to_string())
}

pub fn build_report(
    summary: &HistorySummary,
    forecast: Option<&[ForecastPoint]>,
    generated_on: NaiveDate,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Workforce Separation Report");
    let _ = writeln!(
        output,
        "Generated {} from {} separation records",
        generated_on, summary.total_records
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Indicators");
    let _ = writeln!(
        output,
        "- Highest-separation department: {}",
        summary.top_department.as_deref().unwrap_or("n/a")
    );
    let _ = writeln!(
        output,
        "- Nationality matching '{}': {:.1}% ({} of {})",
        summary.nationality_match,
        summary.matching_share_pct,
        summary.matching_nationality,
        summary.total_records
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Retention Initiatives");
    match summary.top_department.as_deref() {
        Some(department) => {
            let _ = writeln!(output, "- Working-environment improvement plan for {department}");
        }
        None => {
            let _ = writeln!(output, "- Working-environment improvement plan");
        }
    }
    let _ = writeln!(output, "- Review of employee loyalty programmes");
    let _ = writeln!(output, "- Structured exit interviews for every separation");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Records");
    if summary.recent.is_empty() {
        let _ = writeln!(output, "No separation records loaded.");
    } else {
        for record in summary.recent.iter() {
            let _ = writeln!(
                output,
                "- {}: {} ({})",
                record.event_date,
                record.department.as_deref().unwrap_or("-"),
                record.nationality.as_deref().unwrap_or("-")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Forecast");
    match forecast {
        Some(points) if !points.is_empty() => {
            let _ = writeln!(output, "| Month | Expected separations |");
            let _ = writeln!(output, "| --- | ---: |");
            for point in points {
                let _ = writeln!(output, "| {} | {} |", point.period, point.predicted_count);
            }
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "Projected with a Poisson count regression over historical monthly patterns."
            );
        }
        _ => {
            let _ = writeln!(output, "Forecast unavailable for this history.");
        }
    }

    output
}
