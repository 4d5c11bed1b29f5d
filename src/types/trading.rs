use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    /// +1 for Long, -1 for Short
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic label attached to a hidden state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Uptrend,
    Downtrend,
    Sideway,
    /// Extra states of models with more than three states
    State(usize),
}

impl Regime {
    /// Position side this regime asks for, if any
    pub fn direction(&self) -> Option<Side> {
        match self {
            Regime::Uptrend => Some(Side::Long),
            Regime::Downtrend => Some(Side::Short),
            Regime::Sideway | Regime::State(_) => None,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Uptrend => write!(f, "Uptrend"),
            Regime::Downtrend => write!(f, "Downtrend"),
            Regime::Sideway => write!(f, "Sideway"),
            Regime::State(id) => write!(f, "State{}", id),
        }
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Uptrend" => Ok(Regime::Uptrend),
            "Downtrend" => Ok(Regime::Downtrend),
            "Sideway" => Ok(Regime::Sideway),
            other => other
                .strip_prefix("State")
                .and_then(|id| id.parse::<usize>().ok())
                .map(Regime::State)
                .ok_or_else(|| format!("unknown regime label: {}", other)),
        }
    }
}
