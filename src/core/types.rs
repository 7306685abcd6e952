// Core Type Definitions for Flowscope
// Shared vocabulary for the ingest pipeline, detectors, hub and store

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Which side crossed the spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressor {
    Buy,
    Sell,
}

impl Aggressor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggressor::Buy => "buy",
            Aggressor::Sell => "sell",
        }
    }
}

impl fmt::Display for Aggressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Aggressor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" | "b" => Ok(Aggressor::Buy),
            "sell" | "a" | "s" => Ok(Aggressor::Sell),
            _ => Err(format!("invalid aggressor: '{}'", s)),
        }
    }
}

/// Expected price direction implied by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bullish" => Ok(Direction::Bullish),
            "bearish" => Ok(Direction::Bearish),
            _ => Err(format!("invalid direction: '{}'", s)),
        }
    }
}

/// The four signal families the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    DeltaFlip,
    Absorption,
    StackedImbalance,
    Confluence,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::DeltaFlip => "delta_flip",
            SignalKind::Absorption => "absorption",
            SignalKind::StackedImbalance => "stacked_imbalance",
            SignalKind::Confluence => "confluence",
        }
    }

    pub const ALL: [SignalKind; 4] = [
        SignalKind::DeltaFlip,
        SignalKind::Absorption,
        SignalKind::StackedImbalance,
        SignalKind::Confluence,
    ];
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delta_flip" => Ok(SignalKind::DeltaFlip),
            "absorption" => Ok(SignalKind::Absorption),
            "stacked_imbalance" => Ok(SignalKind::StackedImbalance),
            "confluence" => Ok(SignalKind::Confluence),
            _ => Err(format!("invalid signal kind: '{}'", s)),
        }
    }
}

/// Realized result of a signal after the 5-minute horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalOutcome {
    Pending,
    Win,
    Loss,
    Breakeven,
}

impl SignalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalOutcome::Pending => "pending",
            SignalOutcome::Win => "win",
            SignalOutcome::Loss => "loss",
            SignalOutcome::Breakeven => "breakeven",
        }
    }
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SignalOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SignalOutcome::Pending),
            "win" => Ok(SignalOutcome::Win),
            "loss" => Ok(SignalOutcome::Loss),
            "breakeven" => Ok(SignalOutcome::Breakeven),
            _ => Err(format!("invalid outcome: '{}'", s)),
        }
    }
}

/// How the process is fed: live gateway, synthetic generator, or replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    Demo,
    Replay,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Live => "live",
            RunMode::Demo => "demo",
            RunMode::Replay => "replay",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Trade
// ============================================================================

/// A normalized trade execution from any source.
/// Timestamps are milliseconds since the Unix epoch and are monotone
/// non-decreasing within a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub symbol: String,
    pub timestamp: u64,
    pub price: f64,
    pub size: u32,
    pub aggressor: Aggressor,
}

impl Trade {
    pub fn signed_size(&self) -> i64 {
        match self.aggressor {
            Aggressor::Buy => self.size as i64,
            Aggressor::Sell => -(self.size as i64),
        }
    }

    /// 1-second bucket index this trade belongs to (floor semantics: a trade
    /// exactly on the boundary belongs to the later bucket).
    pub fn bucket(&self) -> u64 {
        self.timestamp / 1000
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade(symbol={}, id={}, price={:.2}, size={}, side={})",
            self.symbol, self.trade_id, self.price, self.size, self.aggressor
        )
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// One closed 1-second bucket for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub symbol: String,
    /// Bucket open time, ms since epoch (multiple of 1000).
    pub bucket_start: u64,
    pub buy_volume: u32,
    pub sell_volume: u32,
    pub delta: i64,
    pub vwap: f64,
    pub dominant_side: Aggressor,
    pub significant_imbalance: bool,
}

impl Aggregate {
    pub fn total_volume(&self) -> u32 {
        self.buy_volume + self.sell_volume
    }
}

// ============================================================================
// PriceLevel
// ============================================================================

/// One row of the volume profile histogram. Invariant: total = buy + sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub buy_volume: u64,
    pub sell_volume: u64,
    pub total_volume: u64,
}

impl PriceLevel {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            buy_volume: 0,
            sell_volume: 0,
            total_volume: 0,
        }
    }

    pub fn record(&mut self, aggressor: Aggressor, size: u32) {
        match aggressor {
            Aggressor::Buy => self.buy_volume += size as u64,
            Aggressor::Sell => self.sell_volume += size as u64,
        }
        self.total_volume += size as u64;
    }
}

// ============================================================================
// Signal
// ============================================================================

/// A persisted signal record. Owned by the store after insertion; the rest of
/// the pipeline refers to it by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Emission time on the pipeline clock, ms since epoch.
    pub timestamp: u64,
    pub kind: SignalKind,
    pub direction: Direction,
    pub price: f64,
    pub price_after_1m: Option<f64>,
    pub price_after_5m: Option<f64>,
    pub outcome: SignalOutcome,
}

impl Signal {
    pub fn new(
        session_id: Uuid,
        timestamp: u64,
        kind: SignalKind,
        direction: Direction,
        price: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp,
            kind,
            direction,
            price,
            price_after_1m: None,
            price_after_5m: None,
            outcome: SignalOutcome::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_trade(timestamp: u64, price: f64, size: u32, aggressor: Aggressor) -> Trade {
        Trade {
            trade_id: 1,
            symbol: "NQ.c.0".to_string(),
            timestamp,
            price,
            size,
            aggressor,
        }
    }

    #[test]
    fn test_signed_size() {
        assert_eq!(make_trade(0, 100.0, 7, Aggressor::Buy).signed_size(), 7);
        assert_eq!(make_trade(0, 100.0, 7, Aggressor::Sell).signed_size(), -7);
    }

    #[test]
    fn test_bucket_boundary_belongs_to_later_bucket() {
        assert_eq!(make_trade(999, 100.0, 1, Aggressor::Buy).bucket(), 0);
        assert_eq!(make_trade(1000, 100.0, 1, Aggressor::Buy).bucket(), 1);
        assert_eq!(make_trade(1001, 100.0, 1, Aggressor::Buy).bucket(), 1);
    }

    #[test]
    fn test_price_level_invariant() {
        let mut level = PriceLevel::new(100.0);
        level.record(Aggressor::Buy, 10);
        level.record(Aggressor::Sell, 4);
        assert_eq!(level.total_volume, level.buy_volume + level.sell_volume);
    }

    #[test]
    fn test_enum_round_trips() {
        use std::str::FromStr;

        for kind in SignalKind::ALL {
            assert_eq!(SignalKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(Aggressor::from_str("B").unwrap(), Aggressor::Buy);
        assert_eq!(Direction::from_str("bearish").unwrap(), Direction::Bearish);
        assert_eq!(
            SignalOutcome::from_str("breakeven").unwrap(),
            SignalOutcome::Breakeven
        );
    }
}
