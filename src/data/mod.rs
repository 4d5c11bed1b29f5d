//! CSV input and output for price bars and annotated bar streams

use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{RegimeError, Result};
use crate::types::{Bar, BarStream, Column, Regime, RegimeBar};

const DATE_HEADERS: [&str; 4] = ["date", "datetime", "timestamp", "time"];

/// Header positions found in a CSV file
struct Layout {
    date: Option<usize>,
    volume: Option<usize>,
    columns: Vec<(Column, usize)>,
}

impl Layout {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut layout = Layout {
            date: None,
            volume: None,
            columns: Vec::new(),
        };
        for (i, header) in headers.iter().enumerate() {
            let name = header.trim();
            if DATE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                layout.date.get_or_insert(i);
            } else if name.eq_ignore_ascii_case("volume") {
                layout.volume = Some(i);
            } else if let Some(column) = Column::from_header(name) {
                layout.columns.push((column, i));
            }
        }
        layout
    }

    fn position(&self, column: Column) -> Option<usize> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, i)| *i)
    }

    fn require(&self, required: &[Column]) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|c| self.position(**c).is_none())
            .map(|c| c.as_str().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegimeError::Schema { missing })
        }
    }
}

fn cell<'a>(record: &'a StringRecord, position: Option<usize>) -> Option<&'a str> {
    position
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_cell<T: FromStr>(record: &StringRecord, position: Option<usize>) -> Option<T> {
    cell(record, position).and_then(|s| s.parse().ok())
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and plain `YYYY-MM-DD`
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_reader(file))
}

/// Load OHLC(V) bars. Rows whose prices do not parse are dropped with a warning.
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = reader(path)?;
    let layout = Layout::from_headers(reader.headers()?);
    layout.require(&[Column::Open, Column::High, Column::Low, Column::Close])?;

    let open = layout.position(Column::Open);
    let high = layout.position(Column::High);
    let low = layout.position(Column::Low);
    let close = layout.position(Column::Close);

    let mut bars = Vec::new();
    let mut dropped = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let prices = (
            parse_cell::<Decimal>(&record, open),
            parse_cell::<Decimal>(&record, high),
            parse_cell::<Decimal>(&record, low),
            parse_cell::<Decimal>(&record, close),
        );
        let (o, h, l, c) = match prices {
            (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
            _ => {
                warn!("Row {}: unparsable prices, skipping", row + 1);
                dropped += 1;
                continue;
            }
        };

        let mut bar = Bar::new(o, h, l, c);
        bar.timestamp = cell(&record, layout.date).and_then(parse_timestamp);
        bar.volume = parse_cell(&record, layout.volume).unwrap_or(Decimal::ZERO);
        bars.push(bar);
    }

    debug!("Loaded {} bars from {:?} ({} dropped)", bars.len(), path, dropped);
    Ok(bars)
}

/// Load an annotated stream. The stream provides exactly the columns
/// present in the header; empty or unparsable cells become missing values.
pub fn load_stream(path: &Path) -> Result<BarStream> {
    let mut reader = reader(path)?;
    let layout = Layout::from_headers(reader.headers()?);

    let mut bars = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        bars.push(RegimeBar {
            index,
            timestamp: cell(&record, layout.date).and_then(parse_timestamp),
            open: parse_cell(&record, layout.position(Column::Open)),
            high: parse_cell(&record, layout.position(Column::High)),
            low: parse_cell(&record, layout.position(Column::Low)),
            close: parse_cell(&record, layout.position(Column::Close)),
            regime: parse_cell(&record, layout.position(Column::Regime)),
            most_likely_state: parse_cell::<Regime>(&record, layout.position(Column::MostLikelyState)),
            state_probability: parse_cell(&record, layout.position(Column::StateProbability)),
        });
    }

    let columns = layout.columns.iter().map(|(c, _)| *c);
    Ok(BarStream::new(columns, bars))
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write `stream` with a leading Date column followed by every column it provides
pub fn write_stream(stream: &BarStream, path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    let columns: Vec<Column> = stream.columns().iter().copied().collect();

    let mut header = vec!["Date".to_string()];
    header.extend(columns.iter().map(|c| c.as_str().to_string()));
    writer.write_record(&header)?;

    for bar in stream.bars() {
        let mut record = vec![opt(bar.timestamp.map(|t| t.to_rfc3339()))];
        for column in &columns {
            record.push(match column {
                Column::Open => opt(bar.open),
                Column::High => opt(bar.high),
                Column::Low => opt(bar.low),
                Column::Close => opt(bar.close),
                Column::Regime => opt(bar.regime),
                Column::MostLikelyState => opt(bar.most_likely_state),
                Column::StateProbability => opt(bar.state_probability.map(|p| format!("{:.6}", p))),
            });
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorSettings;
    use crate::engine::simulate;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_bars_skips_bad_rows() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "bars.csv",
            "date,open,high,low,close,volume\n\
             2024-01-02,100,101,99,100.5,1200\n\
             2024-01-03,100.5,n/a,99,101,900\n\
             2024-01-04 00:00:00,101,103,100,102,\n",
        );

        let bars = load_bars(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, dec!(100.5));
        assert_eq!(bars[0].volume, dec!(1200));
        assert_eq!(bars[1].volume, Decimal::ZERO);
        assert_eq!(bars[1].timestamp, parse_timestamp("2024-01-04T00:00:00Z"));
    }

    #[test]
    fn test_load_bars_requires_prices() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "bars.csv", "Date,Close\n2024-01-02,100\n");

        match load_bars(&path) {
            Err(RegimeError::Schema { missing }) => {
                assert_eq!(missing, vec!["Open", "High", "Low"]);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_written_and_read_back() {
        let bars = vec![
            RegimeBar {
                index: 0,
                timestamp: parse_timestamp("2024-01-02"),
                close: Some(dec!(100)),
                regime: Some(Regime::Uptrend),
                ..Default::default()
            },
            RegimeBar {
                index: 1,
                timestamp: parse_timestamp("2024-01-03"),
                close: Some(dec!(101)),
                regime: None,
                ..Default::default()
            },
        ];
        let stream = BarStream::new([Column::Close, Column::Regime], bars.clone());

        let dir = tempdir().unwrap();
        let path = dir.path().join("annotated.csv");
        write_stream(&stream, &path).unwrap();
        let loaded = load_stream(&path).unwrap();

        assert!(loaded.has_column(Column::Regime));
        assert!(!loaded.has_column(Column::StateProbability));
        assert_eq!(loaded.bars(), &bars[..]);
    }

    #[test]
    fn test_simulating_file_without_regime_is_schema_error() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "prices.csv", "Date,Close\n2024-01-02,100\n2024-01-03,101\n");

        let stream = load_stream(&path).unwrap();
        let err = simulate(SimulatorSettings::default(), &stream).unwrap_err();
        assert!(matches!(err, RegimeError::Schema { ref missing } if missing == &vec!["Regime".to_string()]));
    }
}
