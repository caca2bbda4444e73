use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use common::{BacktestError, Bar, Result};
use tracing::{debug, info};

use super::table::{HistoricalTable, REQUIRED_COLUMNS};

/// Alternative header spellings mapped to the standard OHLCV names
const COLUMN_ALIASES: [(&str, &[&str]); 5] = [
    ("open", &["o"]),
    ("high", &["h"]),
    ("low", &["l"]),
    ("close", &["c", "last"]),
    ("volume", &["vol", "v"]),
];

const TIME_HEADERS: [&str; 5] = ["timestamp", "time", "date", "datetime", "open_time"];

/// Load a table from CSV.
///
/// The timestamp column is the first header named like a time key, or the
/// first column otherwise. OHLCV columns are required; every other column
/// that parses as numbers is kept as an indicator column.
pub fn load_csv(path: &Path) -> Result<HistoricalTable> {
    let file = File::open(path).map_err(|e| BacktestError::DataLoadError(e.to_string()))?;
    let table = read_csv(BufReader::new(file))?;
    info!(path = %path.display(), rows = table.len(), "loaded csv data");
    Ok(table)
}

pub fn read_csv<R: Read>(reader: R) -> Result<HistoricalTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| BacktestError::CsvError(e.to_string()))?
        .iter()
        .map(|h| standard_name(&h.to_lowercase()))
        .collect();

    let time_col = headers
        .iter()
        .position(|h| TIME_HEADERS.contains(&h.as_str()))
        .unwrap_or(0);

    let required: Vec<bool> = headers
        .iter()
        .map(|h| REQUIRED_COLUMNS.contains(&h.as_str()))
        .collect();

    let mut rows: Vec<(DateTime<Utc>, Vec<Option<f64>>)> = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| BacktestError::CsvError(e.to_string()))?;
        let timestamp = parse_timestamp(&record[time_col])?;
        // Blank cells are indicator gaps; OHLCV must always be present
        let values = record
            .iter()
            .zip(&required)
            .map(|(field, &is_required)| match (field.is_empty(), is_required) {
                (true, true) => None,
                (true, false) => Some(f64::NAN),
                (false, _) => field.parse::<f64>().ok(),
            })
            .collect();
        rows.push((timestamp, values));
    }
    rows.sort_by_key(|(ts, _)| *ts);

    let mut columns = BTreeMap::new();
    for (col, name) in headers.iter().enumerate() {
        if col == time_col {
            continue;
        }
        let values: Option<Vec<f64>> = rows
            .iter()
            .map(|(_, v)| v.get(col).copied().flatten())
            .collect();

        match values {
            Some(values) => {
                columns.insert(name.clone(), values);
            }
            None if REQUIRED_COLUMNS.contains(&name.as_str()) => {
                return Err(BacktestError::CsvError(format!(
                    "Missing or invalid value in required column '{}'",
                    name
                )));
            }
            None => debug!(column = %name, "skipping non-numeric column"),
        }
    }

    let timestamps = rows.into_iter().map(|(ts, _)| ts).collect();
    HistoricalTable::new(timestamps, columns)
}

/// Load bars from JSON file
pub fn load_json(path: &Path) -> Result<HistoricalTable> {
    let file = File::open(path).map_err(|e| BacktestError::DataLoadError(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut bars: Vec<Bar> = serde_json::from_reader(reader)?;
    bars.sort_by_key(|b| b.timestamp);
    let table = HistoricalTable::from_bars(&bars)?;
    info!(path = %path.display(), rows = table.len(), "loaded json data");
    Ok(table)
}

fn standard_name(header: &str) -> String {
    for (standard, aliases) in COLUMN_ALIASES {
        if aliases.contains(&header) {
            return standard.to_string();
        }
    }
    header.to_string()
}

/// Parse timestamp from various formats
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    // Try ISO 8601 format first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&dt));
            }
        }
    }

    // Unix timestamp, milliseconds when too large to be seconds
    if let Ok(ts) = s.parse::<i64>() {
        let dt = if ts.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(ts)
        } else {
            DateTime::from_timestamp(ts, 0)
        };
        if let Some(dt) = dt {
            return Ok(dt);
        }
    }

    Err(BacktestError::CsvError(format!(
        "Unable to parse timestamp: {}",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp_iso() {
        let ts = parse_timestamp("2024-01-15T09:30:00Z").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 15);
    }

    #[test]
    fn test_parse_timestamp_date_only() {
        let ts = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.hour(), 0);
    }

    #[test]
    fn test_parse_timestamp_unix_seconds_and_millis() {
        let secs = parse_timestamp("1705312200").unwrap();
        let millis = parse_timestamp("1705312200000").unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_read_csv_with_indicator_columns() {
        let data = "\
timestamp,o,h,l,c,vol,sma_2,symbol
2024-01-01 00:01:00,2,3,1,2.5,10,,BTC
2024-01-01 00:00:00,1,2,0.5,1.5,12,,BTC
2024-01-01 00:02:00,3,4,2,3.5,8,3.0,BTC
";
        let table = read_csv(data.as_bytes()).unwrap();

        assert_eq!(table.len(), 3);
        // rows are sorted by time
        assert_eq!(table.column("close").unwrap(), &[1.5, 2.5, 3.5]);
        assert!(table.column("sma_2").unwrap()[0].is_nan());
        assert_eq!(table.column("sma_2").unwrap()[2], 3.0);
        assert!(!table.contains("symbol"));
    }

    #[test]
    fn test_read_csv_missing_required_column() {
        let data = "timestamp,open,high,low,close\n2024-01-01,1,1,1,1\n";
        assert!(read_csv(data.as_bytes()).is_err());
    }

    #[test]
    fn test_read_csv_blank_required_cell() {
        let data = "\
timestamp,open,high,low,close,volume
2024-01-01 00:00:00,1,1,1,1,1
2024-01-01 00:01:00,1,1,1,,1
";
        match read_csv(data.as_bytes()) {
            Err(BacktestError::CsvError(msg)) => assert!(msg.contains("close")),
            other => panic!("expected CsvError, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn test_read_csv_duplicate_timestamps() {
        let data = "\
timestamp,open,high,low,close,volume
2024-01-01,1,1,1,1,1
2024-01-01,1,1,1,1,1
";
        assert!(matches!(
            read_csv(data.as_bytes()),
            Err(BacktestError::InvalidTable(_))
        ));
    }
}
