use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Point on the equity curve, one per simulated bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub index: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub equity: Decimal,
    pub drawdown_pct: Decimal,
    /// Open position after this bar, if any
    pub side: Option<Side>,
    pub size: Decimal,
    pub stop_price: Option<Decimal>,
}

/// Record of a completed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub side: Side,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    /// Net of fees
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub fees: Decimal,
    pub exit_reason: ExitReason,
}

/// Reason for exiting a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TrailingStop,
    /// Regime flip, Sideway label or failed confidence gate
    Regime,
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TrailingStop => write!(f, "Trailing Stop"),
            ExitReason::Regime => write!(f, "Regime"),
            ExitReason::EndOfData => write!(f, "End of Data"),
        }
    }
}

/// Trade log and equity curve of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    /// Bar indices excluded for a missing Close or Regime
    pub skipped_rows: Vec<usize>,
    pub first_close: Option<Decimal>,
    pub last_close: Option<Decimal>,
}

/// Scalar statistics reduced from a [`SimulationResult`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub net_profit: Decimal,
    pub total_return_pct: Decimal,
    pub buy_and_hold_return_pct: Decimal,
    pub annualized_return_pct: Decimal,

    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: Decimal,
    pub sortino_ratio: Decimal,
    pub calmar_ratio: Decimal,

    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_pct: Decimal,
    pub profit_factor: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub total_fees: Decimal,

    pub bars: usize,
    pub skipped_bars: usize,
    /// Share of simulated bars spent in a position
    pub exposure_pct: Decimal,
}

impl PerformanceSummary {
    /// Pretty print results to console
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("                  REGIME BACKTEST RESULTS");
        println!("{}", "=".repeat(60));
        println!("Bars simulated:     {} ({} skipped)", self.bars, self.skipped_bars);
        println!("Initial Capital:    ${:.2}", self.initial_capital);
        println!("Final Equity:       ${:.2}", self.final_equity);
        println!("{}", "-".repeat(60));
        println!("PERFORMANCE");
        println!("  Total Return:       ${:.2} ({:.2}%)", self.net_profit, self.total_return_pct);
        println!("  Buy & Hold Return:  {:.2}%", self.buy_and_hold_return_pct);
        println!("  Annualized Return:  {:.2}%", self.annualized_return_pct);
        println!("  Max Drawdown:       {:.2}%", self.max_drawdown_pct);
        println!("  Sharpe Ratio:       {:.2}", self.sharpe_ratio);
        println!("  Sortino Ratio:      {:.2}", self.sortino_ratio);
        println!("  Calmar Ratio:       {:.2}", self.calmar_ratio);
        println!("  Exposure:           {:.1}%", self.exposure_pct);
        println!("{}", "-".repeat(60));
        println!("TRADES");
        println!("  Total Trades:       {}", self.total_trades);
        println!("  Winning Trades:     {} ({:.1}%)", self.winning_trades, self.win_rate_pct);
        println!("  Losing Trades:      {}", self.losing_trades);
        println!("  Profit Factor:      {:.2}", self.profit_factor);
        println!("  Average Win:        ${:.2}", self.average_win);
        println!("  Average Loss:       ${:.2}", self.average_loss);
        println!("  Largest Win:        ${:.2}", self.largest_win);
        println!("  Largest Loss:       ${:.2}", self.largest_loss);
        println!("  Total Fees:         ${:.2}", self.total_fees);
        println!("{}", "=".repeat(60));
    }
}

/// Calculator for simulation metrics
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn calculate(result: &SimulationResult, periods_per_year: u32) -> PerformanceSummary {
        let trades = &result.trades;
        let initial_capital = result.initial_capital;
        let final_equity = result.final_equity;

        let total_trades = trades.len() as u64;
        let wins: Vec<Decimal> = trades.iter().map(|t| t.pnl).filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = trades.iter().map(|t| t.pnl).filter(|p| *p < Decimal::ZERO).collect();
        let winning_trades = wins.len() as u64;
        let losing_trades = losses.len() as u64;

        let gross_profit: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().map(|p| p.abs()).sum();
        let total_fees: Decimal = trades.iter().map(|t| t.fees).sum();

        let net_profit = final_equity - initial_capital;
        let total_return_pct = pct(net_profit, initial_capital);

        let buy_and_hold_return_pct = match (result.first_close, result.last_close) {
            (Some(first), Some(last)) => pct(last - first, first),
            _ => Decimal::ZERO,
        };

        let bars = result.equity_curve.len();
        let years = bars as f64 / periods_per_year.max(1) as f64;
        let annualized_return_pct = if years > 0.0 {
            let return_factor = (Decimal::ONE + total_return_pct / dec!(100)).to_f64().unwrap_or(1.0);
            if return_factor > 0.0 {
                to_decimal((return_factor.powf(1.0 / years) - 1.0) * 100.0)
            } else {
                dec!(-100)
            }
        } else {
            Decimal::ZERO
        };

        // Win rate
        let win_rate_pct = if total_trades > 0 {
            Decimal::from(winning_trades) / Decimal::from(total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };

        // Profit factor
        let profit_factor = if !gross_loss.is_zero() {
            gross_profit / gross_loss
        } else if gross_profit > Decimal::ZERO {
            dec!(100)
        } else {
            Decimal::ONE
        };

        let average_win = if winning_trades > 0 {
            gross_profit / Decimal::from(winning_trades)
        } else {
            Decimal::ZERO
        };
        let average_loss = if losing_trades > 0 {
            gross_loss / Decimal::from(losing_trades)
        } else {
            Decimal::ZERO
        };
        let largest_win = wins.iter().copied().max().unwrap_or(Decimal::ZERO);
        let largest_loss = losses.iter().map(|p| p.abs()).max().unwrap_or(Decimal::ZERO);

        let max_drawdown_pct = result
            .equity_curve
            .iter()
            .map(|e| e.drawdown_pct)
            .max()
            .unwrap_or(Decimal::ZERO);

        let (sharpe_ratio, sortino_ratio) = Self::calculate_ratios(&result.equity_curve, periods_per_year);

        let calmar_ratio = if !max_drawdown_pct.is_zero() {
            annualized_return_pct / max_drawdown_pct
        } else if annualized_return_pct > Decimal::ZERO {
            dec!(100)
        } else {
            Decimal::ZERO
        };

        let exposed = result.equity_curve.iter().filter(|e| e.side.is_some()).count();
        let exposure_pct = if bars > 0 {
            Decimal::from(exposed as u64) / Decimal::from(bars as u64) * dec!(100)
        } else {
            Decimal::ZERO
        };

        PerformanceSummary {
            initial_capital,
            final_equity,
            net_profit,
            total_return_pct,
            buy_and_hold_return_pct,
            annualized_return_pct,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate_pct,
            profit_factor,
            average_win,
            average_loss,
            largest_win,
            largest_loss,
            total_fees,
            bars,
            skipped_bars: result.skipped_rows.len(),
            exposure_pct,
        }
    }

    /// Annualized Sharpe and Sortino from bar-to-bar equity returns
    fn calculate_ratios(equity_curve: &[EquityPoint], periods_per_year: u32) -> (Decimal, Decimal) {
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].equity.to_f64()?;
                let curr = w[1].equity.to_f64()?;
                (prev > 0.0).then(|| curr / prev - 1.0)
            })
            .collect();

        if returns.len() < 2 {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let n = returns.len() as f64;
        let mean_return = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        let annualizer = (periods_per_year as f64).sqrt();

        // Sharpe ratio (risk-free rate of 0)
        let sharpe = if std_dev > 0.0 {
            mean_return / std_dev * annualizer
        } else {
            0.0
        };

        // Downside deviation (for Sortino)
        let negative_returns: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
        let downside_dev = if !negative_returns.is_empty() {
            (negative_returns.iter().map(|r| r.powi(2)).sum::<f64>() / negative_returns.len() as f64).sqrt()
        } else {
            0.0
        };

        let sortino = if downside_dev > 0.0 {
            mean_return / downside_dev * annualizer
        } else if mean_return > 0.0 {
            100.0
        } else {
            0.0
        };

        (to_decimal(sharpe), to_decimal(sortino))
    }
}

fn pct(value: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        Decimal::ZERO
    } else {
        value / base * dec!(100)
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(index: usize, equity: Decimal, drawdown_pct: Decimal, side: Option<Side>) -> EquityPoint {
        EquityPoint {
            index,
            timestamp: None,
            equity,
            drawdown_pct,
            side,
            size: if side.is_some() { Decimal::ONE } else { Decimal::ZERO },
            stop_price: None,
        }
    }

    fn trade(id: u64, pnl: Decimal) -> TradeRecord {
        TradeRecord {
            id,
            side: Side::Long,
            entry_index: 0,
            exit_index: 1,
            entry_time: None,
            exit_time: None,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            size: Decimal::ONE,
            pnl,
            pnl_pct: pnl,
            fees: Decimal::ZERO,
            exit_reason: ExitReason::Regime,
        }
    }

    #[test]
    fn test_summary_statistics() {
        let result = SimulationResult {
            initial_capital: dec!(1000),
            final_equity: dec!(1010),
            trades: vec![trade(1, dec!(30)), trade(2, dec!(-10)), trade(3, dec!(-10))],
            equity_curve: vec![
                point(0, dec!(1000), dec!(0), Some(Side::Long)),
                point(1, dec!(1030), dec!(0), None),
                point(2, dec!(1010), dec!(1.94), Some(Side::Long)),
                point(3, dec!(1010), dec!(1.94), None),
            ],
            skipped_rows: vec![7],
            first_close: Some(dec!(50)),
            last_close: Some(dec!(55)),
        };

        let summary = MetricsCalculator::calculate(&result, 252);
        assert_eq!(summary.net_profit, dec!(10));
        assert_eq!(summary.total_return_pct, dec!(1));
        assert_eq!(summary.buy_and_hold_return_pct, dec!(10));
        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.profit_factor, dec!(1.5));
        assert_eq!(summary.largest_loss, dec!(10));
        assert_eq!(summary.max_drawdown_pct, dec!(1.94));
        assert_eq!(summary.exposure_pct, dec!(50));
        assert_eq!(summary.skipped_bars, 1);
        assert!(summary.sharpe_ratio > Decimal::ZERO);
    }

    #[test]
    fn test_empty_result() {
        let result = SimulationResult {
            initial_capital: dec!(1000),
            final_equity: dec!(1000),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            skipped_rows: Vec::new(),
            first_close: None,
            last_close: None,
        };

        let summary = MetricsCalculator::calculate(&result, 252);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate_pct, Decimal::ZERO);
        assert_eq!(summary.profit_factor, Decimal::ONE);
        assert_eq!(summary.sharpe_ratio, Decimal::ZERO);
    }
}
