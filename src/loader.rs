use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use encoding_rs::Encoding;
use tracing::{debug, info};

use crate::config::ColumnMapping;
use crate::error::{EngineError, Result};
use crate::models::{EventRecord, LoadOutcome, LoadReport};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

// Month-first wins for ambiguous slash dates; day-first is the fallback.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %B %Y",
    "%m/%d/%y",
    "%d/%m/%y",
];

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2200;

// Spreadsheet serials below this would land before 1927 and are more likely bare numbers.
const MIN_SERIAL: f64 = 10_000.0;

/// Whether the extension names a spreadsheet workbook rather than delimited text.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

pub fn load_csv(path: &Path, columns: &ColumnMapping) -> Result<LoadOutcome> {
    let file = File::open(path).map_err(|err| {
        EngineError::DataUnavailable(format!("cannot open {}: {err}", path.display()))
    })?;
    let outcome = load_from_reader(file, columns)?;
    info!(
        path = %path.display(),
        records = outcome.records.len(),
        skipped = outcome.report.skipped(),
        "loaded separation history"
    );
    Ok(outcome)
}

/// Reads delimited text. Cells that are not valid UTF-8 are decoded with
/// the mapping's fallback encoding, so legacy exports keep every row.
pub fn load_from_reader<R: Read>(reader: R, columns: &ColumnMapping) -> Result<LoadOutcome> {
    let fallback = fallback_encoding(columns)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(columns.delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(|err| EngineError::DataUnavailable(format!("unreadable header row: {err}")))?
        .iter()
        .map(|cell| decode_cell(cell, fallback).into_owned())
        .collect();
    let layout = ColumnLayout::resolve(&headers, columns)?;

    let mut cleaner = Cleaner::default();
    for result in reader.byte_records() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                cleaner.malformed(&err);
                continue;
            }
        };
        let cell = |idx: usize| row.get(idx).map(|bytes| decode_cell(bytes, fallback));

        cleaner.push(
            row.position().map(|p| p.line()),
            cell(layout.date).as_deref().unwrap_or_default(),
            cell(layout.department).as_deref().and_then(category),
            cell(layout.nationality).as_deref().and_then(category),
        );
    }

    Ok(cleaner.finish())
}

/// Reads the first sheet of a spreadsheet workbook; its first row is the header.
pub fn load_workbook(path: &Path, columns: &ColumnMapping) -> Result<LoadOutcome> {
    let mut workbook = open_workbook_auto(path).map_err(|err| {
        EngineError::DataUnavailable(format!("cannot open {}: {err}", path.display()))
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| EngineError::DataUnavailable(format!("{} has no sheets", path.display())))?
        .map_err(|err| {
            EngineError::DataUnavailable(format!("cannot read {}: {err}", path.display()))
        })?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| EngineError::DataUnavailable(format!("{} is empty", path.display())))?
        .iter()
        .map(cell_text)
        .collect();
    let layout = ColumnLayout::resolve(&headers, columns)?;

    let mut cleaner = Cleaner::default();
    for (offset, row) in rows.enumerate() {
        let cell = |idx: usize| row.get(idx).map(cell_text).unwrap_or_default();
        cleaner.push(
            Some(offset as u64 + 2),
            &cell(layout.date),
            category(&cell(layout.department)),
            category(&cell(layout.nationality)),
        );
    }

    let outcome = cleaner.finish();
    info!(
        path = %path.display(),
        records = outcome.records.len(),
        skipped = outcome.report.skipped(),
        "loaded separation history"
    );
    Ok(outcome)
}

struct ColumnLayout {
    date: usize,
    department: usize,
    nationality: usize,
}

impl ColumnLayout {
    fn resolve(headers: &[String], columns: &ColumnMapping) -> Result<Self> {
        Ok(Self {
            date: column_index(headers, &columns.date)?,
            department: column_index(headers, &columns.department)?,
            nationality: column_index(headers, &columns.nationality)?,
        })
    }
}

#[derive(Default)]
struct Cleaner {
    records: Vec<EventRecord>,
    report: LoadReport,
}

impl Cleaner {
    fn push(
        &mut self,
        line: Option<u64>,
        raw_date: &str,
        department: Option<String>,
        nationality: Option<String>,
    ) {
        self.report.rows_read += 1;
        let Some(event_date) = parse_event_date(raw_date) else {
            debug!(line, value = raw_date, "skipping row with unparseable date");
            self.report.skipped_unparseable_date += 1;
            return;
        };
        self.records.push(EventRecord {
            event_date,
            department,
            nationality,
        });
    }

    fn malformed(&mut self, err: &csv::Error) {
        debug!(error = %err, "skipping malformed row");
        self.report.rows_read += 1;
        self.report.skipped_malformed += 1;
    }

    fn finish(self) -> LoadOutcome {
        LoadOutcome {
            records: self.records,
            report: self.report,
        }
    }
}

fn fallback_encoding(columns: &ColumnMapping) -> Result<&'static Encoding> {
    Encoding::for_label(columns.fallback_encoding.as_bytes()).ok_or_else(|| {
        EngineError::InvalidConfig(format!(
            "unknown text encoding '{}'",
            columns.fallback_encoding
        ))
    })
}

fn decode_cell<'a>(bytes: &'a [u8], fallback: &'static Encoding) -> Cow<'a, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => fallback.decode_without_bom_handling(bytes).0,
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        Data::DateTime(value) => value.as_f64().to_string(),
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
    }
}

/// Parses a date cell in any of the accepted forms. Anything else,
/// including locale-specific month names, yields `None`.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.date_naive()).filter(plausible);
    }

    let from_datetime = DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(value, fmt)
            .ok()
            .map(|dt| dt.date())
            .filter(plausible)
    });
    if from_datetime.is_some() {
        return from_datetime;
    }

    let from_date = DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(value, fmt)
            .ok()
            .filter(plausible)
    });
    if from_date.is_some() {
        return from_date;
    }

    year_month(value)
        .or_else(|| compact_date(value))
        .or_else(|| spreadsheet_serial(value))
}

/// `YYYY-MM` or `YYYY/MM`, taken as the first of the month.
fn year_month(value: &str) -> Option<NaiveDate> {
    let (year, month) = value.split_once(['-', '/'])?;
    if year.len() != 4 || !(1..=2).contains(&month.len()) {
        return None;
    }
    if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1).filter(plausible)
}

/// `YYYYMMDD` with no separators.
fn compact_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        value[..4].parse().ok()?,
        value[4..6].parse().ok()?,
        value[6..].parse().ok()?,
    )
    .filter(plausible)
}

fn spreadsheet_serial(value: &str) -> Option<NaiveDate> {
    let serial: f64 = value.parse().ok()?;
    if !serial.is_finite() || serial < MIN_SERIAL {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch
        .checked_add_signed(Duration::try_days(serial.trunc() as i64)?)
        .filter(plausible)
}

fn plausible(date: &NaiveDate) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&date.year())
}

fn column_index(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim_start_matches('\u{feff}').trim() == name)
        .ok_or_else(|| EngineError::DataUnavailable(format!("missing required column '{name}'")))
}

fn category(cell: &str) -> Option<String> {
    let value = cell.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn parses_common_date_forms() {
        assert_eq!(parse_event_date("2024-03-15"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("2024/03/15"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("2024-03-15 08:30:00"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("2024-03-15T08:30:00+03:00"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("15 Mar 2024"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("Mar 15, 2024"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("15/03/2024 10:00"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("15/03/2024 10:00:30"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("03/15/2024 10:00"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_event_date("20240315"), Some(ymd(2024, 3, 15)));
    }

    #[test]
    fn year_month_means_first_of_month() {
        assert_eq!(parse_event_date("2024-03"), Some(ymd(2024, 3, 1)));
        assert_eq!(parse_event_date("2024/11"), Some(ymd(2024, 11, 1)));
        assert_eq!(parse_event_date("2024-13"), None);
        assert_eq!(parse_event_date("03-2024"), None);
    }

    #[test]
    fn slash_dates_prefer_month_first() {
        assert_eq!(parse_event_date("03/04/2024"), Some(ymd(2024, 3, 4)));
        assert_eq!(parse_event_date("25/12/2023"), Some(ymd(2023, 12, 25)));
    }

    #[test]
    fn two_digit_years_are_not_read_as_first_century() {
        assert_eq!(parse_event_date("01/15/24"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn spreadsheet_serials_use_1900_system() {
        assert_eq!(parse_event_date("45292"), Some(ymd(2024, 1, 1)));
        assert_eq!(parse_event_date("45292.75"), Some(ymd(2024, 1, 1)));
        assert_eq!(parse_event_date("2024"), None);
    }

    #[test]
    fn unparseable_dates_fail_gracefully() {
        assert_eq!(parse_event_date(""), None);
        assert_eq!(parse_event_date("not a date"), None);
        assert_eq!(parse_event_date("15 يناير 2024"), None);
        assert_eq!(parse_event_date("2024-13-40"), None);
    }

    #[test]
    fn drops_rows_with_bad_dates_and_keeps_the_rest() {
        let data = "\
event_date,department,nationality
2024-01-10,Finance,Saudi
garbage,Finance,Saudi
2024-02-11,,Egyptian
,IT,Saudi
2024-03-12,IT,
";
        let outcome = load_from_reader(data.as_bytes(), &ColumnMapping::default()).unwrap();

        assert_eq!(outcome.report.rows_read, 5);
        assert_eq!(outcome.report.skipped_unparseable_date, 2);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records[1].department, None);
        assert_eq!(outcome.records[1].nationality.as_deref(), Some("Egyptian"));
        assert_eq!(outcome.records[2].nationality, None);
        assert_eq!(outcome.records[2].year(), 2024);
        assert_eq!(outcome.records[2].month(), 3);
    }

    #[test]
    fn honors_custom_columns_and_delimiter() {
        let data = "\u{feff}End Date;Unit;Country\n2023-11-02;Ops;Saudi\n";
        let columns = ColumnMapping {
            date: "End Date".to_string(),
            department: "Unit".to_string(),
            nationality: "Country".to_string(),
            delimiter: b';',
            ..ColumnMapping::default()
        };
        let outcome = load_from_reader(data.as_bytes(), &columns).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].department.as_deref(), Some("Ops"));
    }

    #[test]
    fn legacy_encoded_categories_keep_their_rows() {
        // "المالية" in windows-1256.
        let mut data = b"event_date,department,nationality\n2024-01-10,".to_vec();
        data.extend_from_slice(&[0xC7, 0xE1, 0xE3, 0xC7, 0xE1, 0xED, 0xC9]);
        data.extend_from_slice(b",Saudi\n2024-02-01,IT,Saudi\n");

        let outcome = load_from_reader(data.as_slice(), &ColumnMapping::default()).unwrap();

        assert_eq!(outcome.report.rows_read, 2);
        assert_eq!(outcome.report.skipped(), 0);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].department.as_deref(), Some("المالية"));
        assert_eq!(outcome.records[1].department.as_deref(), Some("IT"));
    }

    #[test]
    fn unknown_fallback_encoding_is_rejected() {
        let columns = ColumnMapping {
            fallback_encoding: "klingon".to_string(),
            ..ColumnMapping::default()
        };
        let err = load_from_reader(&b"event_date,department,nationality\n"[..], &columns)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn picks_loader_by_extension() {
        assert!(is_workbook(Path::new("Resigned Report.xlsx")));
        assert!(is_workbook(Path::new("history.XLS")));
        assert!(!is_workbook(Path::new("history.csv")));
        assert!(!is_workbook(Path::new("history")));
    }

    #[test]
    fn loads_first_sheet_of_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "event_date").unwrap();
        sheet.write_string(0, 1, "department").unwrap();
        sheet.write_string(0, 2, "nationality").unwrap();
        sheet.write_number(1, 0, 45292.0).unwrap();
        sheet.write_string(1, 1, "المالية").unwrap();
        sheet.write_string(1, 2, "سعودي").unwrap();
        sheet.write_string(2, 0, "2024-02-15").unwrap();
        sheet.write_string(2, 1, "IT").unwrap();
        sheet.write_string(3, 0, "pending").unwrap();
        sheet.write_string(3, 1, "IT").unwrap();
        workbook.save(&path).unwrap();

        let outcome = load_workbook(&path, &ColumnMapping::default()).unwrap();

        assert_eq!(outcome.report.rows_read, 3);
        assert_eq!(outcome.report.skipped_unparseable_date, 1);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].event_date, ymd(2024, 1, 1));
        assert_eq!(outcome.records[0].department.as_deref(), Some("المالية"));
        assert_eq!(outcome.records[1].event_date, ymd(2024, 2, 15));
        assert_eq!(outcome.records[1].nationality, None);
    }

    #[test]
    fn workbook_missing_column_is_data_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "event_date").unwrap();
        sheet.write_string(1, 0, "2024-02-15").unwrap();
        workbook.save(&path).unwrap();

        let err = load_workbook(&path, &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn missing_column_is_data_unavailable() {
        let data = "date,department\n2024-01-01,IT\n";
        let err = load_from_reader(data.as_bytes(), &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn missing_file_is_data_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_csv(&dir.path().join("absent.csv"), &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(
            &path,
            "event_date,department,nationality\n2024-05-01,HR,Saudi\n2024-05-20,HR,Indian\n",
        )
        .unwrap();

        let outcome = load_csv(&path, &ColumnMapping::default()).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.report.skipped(), 0);
    }
}
