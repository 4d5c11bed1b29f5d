use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::results::{EquityPoint, ExitReason, SimulationResult, TradeRecord};
use crate::config::SimulatorSettings;
use crate::error::{RegimeError, Result};
use crate::types::{BarStream, Column, Position, Regime, RegimeBar, Side};

/// What the regime asks for on one bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegimeAction {
    Hold(Side),
    Flatten,
}

/// Bar-by-bar replay of the regime strategy.
///
/// Per bar: trailing-stop check first, then the regime action, then one
/// equity point. At most one position is ever open.
pub struct PositionSimulator {
    settings: SimulatorSettings,
    cash: Decimal,
    position: Option<Position>,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
    skipped_rows: Vec<usize>,
    peak_equity: Decimal,
    next_trade_id: u64,
}

impl PositionSimulator {
    pub fn new(settings: SimulatorSettings) -> Result<Self> {
        if settings.initial_capital <= Decimal::ZERO {
            return Err(RegimeError::InvalidParameter("initial_capital must be > 0".to_string()));
        }
        if settings.stop_fraction < Decimal::ZERO || settings.stop_fraction >= Decimal::ONE {
            return Err(RegimeError::InvalidParameter("stop_fraction must be in [0, 1)".to_string()));
        }
        if settings.risk_percent < Decimal::ZERO {
            return Err(RegimeError::InvalidParameter("risk_percent must be >= 0".to_string()));
        }
        if settings.fee_rate < Decimal::ZERO {
            return Err(RegimeError::InvalidParameter("fee_rate must be >= 0".to_string()));
        }

        let cash = settings.initial_capital;
        Ok(Self {
            settings,
            cash,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            skipped_rows: Vec::new(),
            peak_equity: cash,
            next_trade_id: 1,
        })
    }

    pub fn is_gated(&self) -> bool {
        self.settings.confidence_threshold.is_some()
    }

    /// Columns the stream must provide before the run starts
    pub fn required_columns(&self) -> Vec<Column> {
        let mut required = vec![Column::Close, Column::Regime];
        if self.is_gated() {
            required.push(Column::MostLikelyState);
            required.push(Column::StateProbability);
        }
        required
    }

    fn reset(&mut self) {
        self.cash = self.settings.initial_capital;
        self.position = None;
        self.trades.clear();
        self.equity_curve.clear();
        self.skipped_rows.clear();
        self.peak_equity = self.cash;
        self.next_trade_id = 1;
    }

    /// Replay `stream`. Fails before touching any state if a required
    /// column is missing; rows lacking Close or Regime are skipped.
    pub fn run(&mut self, stream: &BarStream) -> Result<SimulationResult> {
        stream.require(&self.required_columns())?;
        self.reset();

        let mut first_close = None;
        let mut last_bar: Option<(usize, Option<DateTime<Utc>>, Decimal)> = None;

        for bar in stream.bars() {
            let (close, regime) = match (bar.close, bar.regime) {
                (Some(close), Some(regime)) => (close, regime),
                _ => {
                    self.skipped_rows.push(bar.index);
                    continue;
                }
            };
            first_close.get_or_insert(close);

            self.check_trailing_stop(bar, close);
            self.apply_regime(bar, close, regime);
            self.record_equity(bar, close);

            last_bar = Some((bar.index, bar.timestamp, close));
        }

        if self.settings.close_at_end {
            if let Some((index, timestamp, close)) = last_bar {
                if self.position.is_some() {
                    debug!("Closing open position at end of data");
                    self.close_position(close, index, timestamp, ExitReason::EndOfData);
                }
            }
        }

        if !self.skipped_rows.is_empty() {
            warn!(
                "Skipped {} bars with missing Close or Regime",
                self.skipped_rows.len()
            );
        }

        let last_close = last_bar.map(|(_, _, close)| close);
        let final_equity = match last_close {
            Some(close) => self.equity_at(close),
            None => self.cash,
        };

        info!(
            "Simulation finished: {} bars, {} trades, final equity {:.2}",
            self.equity_curve.len(),
            self.trades.len(),
            final_equity
        );

        Ok(SimulationResult {
            initial_capital: self.settings.initial_capital,
            final_equity,
            trades: self.trades.clone(),
            equity_curve: self.equity_curve.clone(),
            skipped_rows: self.skipped_rows.clone(),
            first_close,
            last_close,
        })
    }

    fn check_trailing_stop(&mut self, bar: &RegimeBar, close: Decimal) {
        let stop_fraction = self.settings.stop_fraction;
        let triggered = match self.position.as_mut() {
            Some(position) => {
                position.trail(close, stop_fraction);
                position.stop_triggered(close)
            }
            None => false,
        };

        if triggered {
            if let Some(position) = &self.position {
                debug!(
                    "[{}] Trailing stop hit: close={:.2} stop={:.2} extreme={:.2}",
                    bar.index, close, position.stop_price, position.extreme_price
                );
            }
            self.close_position(close, bar.index, bar.timestamp, ExitReason::TrailingStop);
        }
    }

    fn action_for(&self, bar: &RegimeBar, regime: Regime) -> RegimeAction {
        let side = match regime.direction() {
            Some(side) => side,
            None => return RegimeAction::Flatten,
        };

        match self.settings.confidence_threshold {
            None => RegimeAction::Hold(side),
            Some(threshold) => {
                let agrees = bar.most_likely_state == Some(regime);
                let confident = bar.state_probability.map_or(false, |p| p >= threshold);
                if agrees && confident {
                    RegimeAction::Hold(side)
                } else {
                    RegimeAction::Flatten
                }
            }
        }
    }

    fn apply_regime(&mut self, bar: &RegimeBar, close: Decimal, regime: Regime) {
        match self.action_for(bar, regime) {
            RegimeAction::Hold(side) => {
                let current = self.position.as_ref().map(|p| p.side);
                if current == Some(side) {
                    return;
                }
                if current.is_some() {
                    self.close_position(close, bar.index, bar.timestamp, ExitReason::Regime);
                }
                self.open_position(side, close, bar.index, bar.timestamp);
            }
            RegimeAction::Flatten => {
                if self.position.is_some() {
                    self.close_position(close, bar.index, bar.timestamp, ExitReason::Regime);
                }
            }
        }
    }

    /// Units to buy or sell short at `price`.
    ///
    /// min(floor(risk capital / (price * stop fraction)), floor(equity / price)),
    /// never below one unit.
    pub fn entry_size(&self, price: Decimal, equity: Decimal) -> Decimal {
        let risk_capital = self.settings.initial_capital * self.settings.risk_percent;
        let risk_per_unit = price * self.settings.stop_fraction;

        if price <= Decimal::ZERO
            || risk_per_unit <= Decimal::ZERO
            || risk_capital <= Decimal::ZERO
            || equity <= Decimal::ZERO
        {
            return Decimal::ONE;
        }

        let by_risk = (risk_capital / risk_per_unit).floor();
        let by_equity = (equity / price).floor();
        by_risk.min(by_equity).max(Decimal::ONE)
    }

    fn open_position(&mut self, side: Side, price: Decimal, index: usize, timestamp: Option<DateTime<Utc>>) {
        let equity = self.equity_at(price);
        let size = self.entry_size(price, equity);
        let fee = size * price * self.settings.fee_rate;
        self.cash -= fee;

        let position = Position::open(
            self.next_trade_id,
            side,
            price,
            size,
            self.settings.stop_fraction,
            index,
            timestamp,
        )
        .with_entry_fee(fee);
        self.next_trade_id += 1;

        debug!(
            "[{}] Opening {}: {} @ {:.2} (stop {:.2})",
            index, side, size, price, position.stop_price
        );
        self.position = Some(position);
    }

    fn close_position(&mut self, price: Decimal, index: usize, timestamp: Option<DateTime<Utc>>, exit_reason: ExitReason) {
        let position = match self.position.take() {
            Some(p) => p,
            None => return,
        };

        let gross_pnl = position.calculate_pnl(price);
        let exit_fee = position.size * price * self.settings.fee_rate;
        let fees = position.entry_fee + exit_fee;
        let net_pnl = gross_pnl - fees;
        self.cash += gross_pnl - exit_fee;

        debug!(
            "[{}] Closed {} ({}): ${:.2} P&L",
            index, position.side, exit_reason, net_pnl
        );

        self.trades.push(TradeRecord {
            id: position.id,
            side: position.side,
            entry_index: position.entry_index,
            exit_index: index,
            entry_time: position.entry_time,
            exit_time: timestamp,
            entry_price: position.entry_price,
            exit_price: price,
            size: position.size,
            pnl: net_pnl,
            pnl_pct: position.pnl_percentage(price),
            fees,
            exit_reason,
        });
    }

    /// Cash plus unrealized P&L marked at `price`
    fn equity_at(&self, price: Decimal) -> Decimal {
        match &self.position {
            Some(position) => self.cash + position.calculate_pnl(price),
            None => self.cash,
        }
    }

    fn record_equity(&mut self, bar: &RegimeBar, close: Decimal) {
        let equity = self.equity_at(close);
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown_pct = if self.peak_equity > Decimal::ZERO {
            (self.peak_equity - equity) / self.peak_equity * dec!(100)
        } else {
            Decimal::ZERO
        };

        self.equity_curve.push(EquityPoint {
            index: bar.index,
            timestamp: bar.timestamp,
            equity,
            drawdown_pct,
            side: self.position.as_ref().map(|p| p.side),
            size: self.position.as_ref().map_or(Decimal::ZERO, |p| p.size),
            stop_price: self.position.as_ref().map(|p| p.stop_price),
        });
    }
}

/// Run a fresh simulator over `stream`
pub fn simulate(settings: SimulatorSettings, stream: &BarStream) -> Result<SimulationResult> {
    PositionSimulator::new(settings)?.run(stream)
}
