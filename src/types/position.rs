use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// The single open position held by the simulator.
///
/// `extreme_price` is the best close seen since entry (running max for a
/// Long, running min for a Short). `stop_price` trails it at a fixed
/// fraction and only ever moves in the position's favour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub side: Side,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub entry_index: usize,
    pub entry_time: Option<DateTime<Utc>>,
    pub extreme_price: Decimal,
    pub stop_price: Decimal,
    pub entry_fee: Decimal,
}

impl Position {
    pub fn open(
        id: u64,
        side: Side,
        entry_price: Decimal,
        size: Decimal,
        stop_fraction: Decimal,
        entry_index: usize,
        entry_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            side,
            entry_price,
            size,
            entry_index,
            entry_time,
            extreme_price: entry_price,
            stop_price: stop_from_extreme(side, entry_price, stop_fraction),
            entry_fee: Decimal::ZERO,
        }
    }

    pub fn with_entry_fee(mut self, fee: Decimal) -> Self {
        self.entry_fee = fee;
        self
    }

    pub fn calculate_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.size * self.side.sign()
    }

    pub fn pnl_percentage(&self, price: Decimal) -> Decimal {
        let entry_value = self.entry_value();
        if entry_value.is_zero() {
            return Decimal::ZERO;
        }
        self.calculate_pnl(price) / entry_value * Decimal::from(100)
    }

    pub fn entry_value(&self) -> Decimal {
        self.entry_price * self.size
    }

    /// Fold `close` into the trailing extreme and ratchet the stop
    pub fn trail(&mut self, close: Decimal, stop_fraction: Decimal) {
        match self.side {
            Side::Long => {
                if close > self.extreme_price {
                    self.extreme_price = close;
                }
                let candidate = stop_from_extreme(self.side, self.extreme_price, stop_fraction);
                if candidate > self.stop_price {
                    self.stop_price = candidate;
                }
            }
            Side::Short => {
                if close < self.extreme_price {
                    self.extreme_price = close;
                }
                let candidate = stop_from_extreme(self.side, self.extreme_price, stop_fraction);
                if candidate < self.stop_price {
                    self.stop_price = candidate;
                }
            }
        }
    }

    pub fn stop_triggered(&self, close: Decimal) -> bool {
        match self.side {
            Side::Long => close <= self.stop_price,
            Side::Short => close >= self.stop_price,
        }
    }
}

fn stop_from_extreme(side: Side, extreme: Decimal, stop_fraction: Decimal) -> Decimal {
    match side {
        Side::Long => extreme * (Decimal::ONE - stop_fraction),
        Side::Short => extreme * (Decimal::ONE + stop_fraction),
    }
}
