//! Trade calendar lookup.
//!
//! The scheduler anchors every pass on the "current trade date": the latest
//! trading day strictly before today. [`CsvCalendar`] reads an exchange
//! calendar export; [`WeekdayCalendar`] is the fallback when none is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::config::CalendarConfig;
use crate::error::CalendarError;

const DATE_COLUMNS: [&str; 2] = ["交易日期", "trade_date"];

pub trait TradeCalendar: Send + Sync {
    /// Latest trading day strictly before `date`.
    ///
    /// If no trading day precedes `date` the earliest known one is returned;
    /// `None` only when the calendar knows no dates at all.
    fn last_trade_date_before(&self, date: NaiveDate) -> Option<NaiveDate>;
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CsvCalendar {
    path: PathBuf,
    dates: Vec<NaiveDate>,
}

impl CsvCalendar {
    pub fn load(path: &Path) -> Result<Self, CalendarError> {
        let contents = std::fs::read_to_string(path).map_err(|e| CalendarError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let dates = parse_dates(&contents).ok_or_else(|| CalendarError::MissingColumn {
            path: path.to_path_buf(),
        })?;
        tracing::debug!(path = %path.display(), days = dates.len(), "loaded trade calendar");
        Ok(Self {
            path: path.to_path_buf(),
            dates,
        })
    }

    /// Re-read the file after it changed on disk.
    pub fn reload(&mut self) -> Result<(), CalendarError> {
        *self = Self::load(&self.path)?;
        Ok(())
    }

    /// All trading days, ascending.
    pub fn trade_dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn is_trade_date(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }
}

impl TradeCalendar for CsvCalendar {
    fn last_trade_date_before(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d < date);
        if idx == 0 {
            self.dates.first().copied()
        } else {
            Some(self.dates[idx - 1])
        }
    }
}

/// Returns `None` when the header has no recognised date column.
fn parse_dates(contents: &str) -> Option<Vec<NaiveDate>> {
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
    let mut lines = contents.lines();
    let header = lines.next()?;
    let column = split_row(header)
        .iter()
        .position(|h| DATE_COLUMNS.contains(&h.as_str()))?;

    let mut dates: Vec<NaiveDate> = lines
        .filter_map(|line| {
            let cell = split_row(line).into_iter().nth(column)?;
            match NaiveDate::parse_from_str(&cell, "%Y-%m-%d") {
                Ok(d) => Some(d),
                Err(_) => {
                    if !cell.is_empty() {
                        tracing::debug!(value = %cell, "skipping malformed calendar date");
                    }
                    None
                }
            }
        })
        .collect();
    dates.sort_unstable();
    dates.dedup();
    Some(dates)
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|cell| cell.trim().trim_matches('"').trim().to_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Weekday fallback
// ---------------------------------------------------------------------------

/// Treats every Monday–Friday as a trading day.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekdayCalendar;

impl TradeCalendar for WeekdayCalendar {
    fn last_trade_date_before(&self, date: NaiveDate) -> Option<NaiveDate> {
        let mut day = date - Duration::days(1);
        while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            day -= Duration::days(1);
        }
        Some(day)
    }
}

/// Build the calendar named by the hub configuration.
///
/// A relative `calendar.file` is resolved against `base_dir` (the config
/// file's directory).
pub fn from_config(
    config: &CalendarConfig,
    base_dir: &Path,
) -> Result<Arc<dyn TradeCalendar>, CalendarError> {
    match &config.file {
        Some(file) => {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            Ok(Arc::new(CsvCalendar::load(&path)?))
        }
        None => Ok(Arc::new(WeekdayCalendar)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn write_calendar(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trading_calendar.csv");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn csv_with_bom_and_chinese_header() {
        let (_dir, path) = write_calendar(
            "\u{feff}交易日期,备注\n2024-01-03,\n2024-01-02,\nbad-date,\n2024-01-03,\n2024-01-05,\n",
        );
        let cal = CsvCalendar::load(&path).unwrap();
        assert_eq!(
            cal.trade_dates(),
            &[d("2024-01-02"), d("2024-01-03"), d("2024-01-05")]
        );
        assert!(cal.is_trade_date(d("2024-01-05")));
        assert!(!cal.is_trade_date(d("2024-01-04")));
    }

    #[rstest]
    #[case("2024-01-04", Some("2024-01-03"))]
    #[case("2024-01-03", Some("2024-01-02"))]
    #[case("2024-01-10", Some("2024-01-05"))]
    #[case("2023-12-01", Some("2024-01-02"))]
    fn csv_lookup_is_strictly_before(#[case] today: &str, #[case] expected: Option<&str>) {
        let (_dir, path) = write_calendar("trade_date\n2024-01-02\n2024-01-03\n2024-01-05\n");
        let cal = CsvCalendar::load(&path).unwrap();
        assert_eq!(cal.last_trade_date_before(d(today)), expected.map(d));
    }

    #[test]
    fn empty_calendar_yields_none() {
        let (_dir, path) = write_calendar("trade_date\n");
        let cal = CsvCalendar::load(&path).unwrap();
        assert_eq!(cal.last_trade_date_before(d("2024-01-01")), None);
    }

    #[test]
    fn missing_column_is_an_error() {
        let (_dir, path) = write_calendar("date\n2024-01-02\n");
        let err = CsvCalendar::load(&path).unwrap_err();
        assert!(matches!(err, CalendarError::MissingColumn { .. }));
    }

    #[rstest]
    #[case("2024-01-08", "2024-01-05")] // Monday -> Friday
    #[case("2024-01-07", "2024-01-05")] // Sunday -> Friday
    #[case("2024-01-10", "2024-01-09")] // Wednesday -> Tuesday
    fn weekday_calendar(#[case] today: &str, #[case] expected: &str) {
        assert_eq!(
            WeekdayCalendar.last_trade_date_before(d(today)),
            Some(d(expected))
        );
    }

    #[test]
    fn from_config_resolves_relative_file() {
        let (dir, _path) = write_calendar("trade_date\n2024-01-02\n");
        let config = CalendarConfig {
            file: Some(PathBuf::from("trading_calendar.csv")),
        };
        let cal = from_config(&config, dir.path()).unwrap();
        assert_eq!(
            cal.last_trade_date_before(d("2024-02-01")),
            Some(d("2024-01-02"))
        );

        let fallback = from_config(&CalendarConfig::default(), dir.path()).unwrap();
        assert!(fallback.last_trade_date_before(d("2024-02-01")).is_some());
    }
}
