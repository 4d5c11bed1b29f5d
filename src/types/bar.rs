use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::Regime;
use crate::error::{RegimeError, Result};

/// One OHLCV bar of market data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: Option<DateTime<Utc>>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            timestamp: None,
            open,
            high,
            low,
            close,
            volume: Decimal::ZERO,
        }
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// Columns a bar stream may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Open,
    High,
    Low,
    Close,
    Regime,
    MostLikelyState,
    StateProbability,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Open,
        Column::High,
        Column::Low,
        Column::Close,
        Column::Regime,
        Column::MostLikelyState,
        Column::StateProbability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Open => "Open",
            Column::High => "High",
            Column::Low => "Low",
            Column::Close => "Close",
            Column::Regime => "Regime",
            Column::MostLikelyState => "MostLikelyState",
            Column::StateProbability => "StateProbability",
        }
    }

    pub fn from_header(header: &str) -> Option<Self> {
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(header.trim()))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bar annotated with regime information; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeBar {
    pub index: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub regime: Option<Regime>,
    pub most_likely_state: Option<Regime>,
    pub state_probability: Option<f64>,
}

impl RegimeBar {
    pub fn from_bar(index: usize, bar: &Bar) -> Self {
        Self {
            index,
            timestamp: bar.timestamp,
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            close: Some(bar.close),
            ..Default::default()
        }
    }
}

/// Ordered bar stream together with the set of columns it provides
#[derive(Debug, Clone, Default)]
pub struct BarStream {
    columns: BTreeSet<Column>,
    bars: Vec<RegimeBar>,
}

impl BarStream {
    pub fn new(columns: impl IntoIterator<Item = Column>, bars: Vec<RegimeBar>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            bars,
        }
    }

    /// Stream of plain price bars, without regime columns
    pub fn from_bars(bars: &[Bar]) -> Self {
        Self::new(
            [Column::Open, Column::High, Column::Low, Column::Close],
            bars.iter()
                .enumerate()
                .map(|(i, bar)| RegimeBar::from_bar(i, bar))
                .collect(),
        )
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    pub fn bars(&self) -> &[RegimeBar] {
        &self.bars
    }

    pub fn bars_mut(&mut self) -> &mut [RegimeBar] {
        &mut self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// Fails with a schema error naming every absent column
    pub fn require(&self, required: &[Column]) -> Result<()> {
        let missing: Vec<String> = required
            .iter()
            .filter(|c| !self.columns.contains(c))
            .map(|c| c.as_str().to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegimeError::Schema { missing })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_require_lists_all_missing_columns() {
        let bars = vec![Bar::new(dec!(1), dec!(2), dec!(0.5), dec!(1.5))];
        let stream = BarStream::from_bars(&bars);

        assert!(stream.require(&[Column::Close]).is_ok());
        match stream.require(&[Column::Close, Column::Regime, Column::StateProbability]) {
            Err(RegimeError::Schema { missing }) => {
                assert_eq!(missing, vec!["Regime".to_string(), "StateProbability".to_string()]);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_column_from_header() {
        assert_eq!(Column::from_header("close"), Some(Column::Close));
        assert_eq!(Column::from_header(" MostLikelyState"), Some(Column::MostLikelyState));
        assert_eq!(Column::from_header("Volume"), None);
    }
}
