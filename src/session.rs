// Session Manager - one logical run of the pipeline
// Owns session extremes, total volume and per-kind signal statistics;
// reports them once per second and finalizes the store row on close

use std::collections::HashMap;
use uuid::Uuid;

use crate::core::types::{Direction, RunMode, SignalKind, SignalOutcome};
use crate::hub::messages::{SessionStatsMsg, SignalStatsMsg};

#[derive(Debug, Clone, Default)]
struct KindStats {
    count: u32,
    bullish: u32,
    bearish: u32,
    wins: u32,
    losses: u32,
    move_1m_sum: f64,
    move_1m_count: u32,
    move_5m_sum: f64,
    move_5m_count: u32,
}

impl KindStats {
    fn to_msg(&self) -> SignalStatsMsg {
        let completed = self.wins + self.losses;
        SignalStatsMsg {
            count: self.count,
            bullish_count: self.bullish,
            bearish_count: self.bearish,
            wins: self.wins,
            losses: self.losses,
            avg_move_1m: if self.move_1m_count > 0 {
                self.move_1m_sum / self.move_1m_count as f64
            } else {
                0.0
            },
            avg_move_5m: if self.move_5m_count > 0 {
                self.move_5m_sum / self.move_5m_count as f64
            } else {
                0.0
            },
            win_rate: if completed > 0 {
                self.wins as f64 / completed as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

/// A session exclusively owns all signals produced during it. Opened on
/// pipeline start, closed on shutdown or an explicit rotate.
pub struct SessionTracker {
    id: Uuid,
    started_at: u64,
    mode: RunMode,
    symbols: Vec<String>,
    session_high: f64,
    session_low: f64,
    total_volume: u64,
    current_price: f64,
    per_kind: HashMap<SignalKind, KindStats>,
    closed: bool,
}

impl SessionTracker {
    pub fn open(mode: RunMode, symbols: Vec<String>, started_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            mode,
            symbols,
            session_high: f64::MIN,
            session_low: f64::MAX,
            total_volume: 0,
            current_price: 0.0,
            per_kind: HashMap::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    pub fn session_high(&self) -> f64 {
        if self.session_high == f64::MIN {
            self.current_price
        } else {
            self.session_high
        }
    }

    pub fn session_low(&self) -> f64 {
        if self.session_low == f64::MAX {
            self.current_price
        } else {
            self.session_low
        }
    }

    pub fn on_trade(&mut self, price: f64, size: u32) {
        self.current_price = price;
        if price > self.session_high || self.session_high == f64::MIN {
            self.session_high = price;
        }
        if price < self.session_low || self.session_low == f64::MAX {
            self.session_low = price;
        }
        self.total_volume += size as u64;
    }

    pub fn on_signal(&mut self, kind: SignalKind, direction: Direction) {
        let stats = self.per_kind.entry(kind).or_default();
        stats.count += 1;
        match direction {
            Direction::Bullish => stats.bullish += 1,
            Direction::Bearish => stats.bearish += 1,
        }
    }

    /// Fold a filled horizon into the averages. Moves are signed
    /// (price_after − price_at_emit), matching how the averages read on a
    /// chart.
    pub fn on_mark_filled(&mut self, kind: SignalKind, horizon_move: f64, is_5m: bool) {
        let stats = self.per_kind.entry(kind).or_default();
        if is_5m {
            stats.move_5m_sum += horizon_move;
            stats.move_5m_count += 1;
        } else {
            stats.move_1m_sum += horizon_move;
            stats.move_1m_count += 1;
        }
    }

    pub fn on_outcome(&mut self, kind: SignalKind, outcome: SignalOutcome) {
        let stats = self.per_kind.entry(kind).or_default();
        match outcome {
            SignalOutcome::Win => stats.wins += 1,
            SignalOutcome::Loss => stats.losses += 1,
            SignalOutcome::Breakeven | SignalOutcome::Pending => {}
        }
    }

    pub fn stats_msg(&self) -> SessionStatsMsg {
        let kind = |k: SignalKind| {
            self.per_kind
                .get(&k)
                .map(KindStats::to_msg)
                .unwrap_or_default()
        };
        SessionStatsMsg {
            session_start: self.started_at,
            current_price: self.current_price,
            session_high: self.session_high(),
            session_low: self.session_low(),
            total_volume: self.total_volume,
            delta_flips: kind(SignalKind::DeltaFlip),
            absorptions: kind(SignalKind::Absorption),
            stacked_imbalances: kind(SignalKind::StackedImbalance),
            confluences: kind(SignalKind::Confluence),
        }
    }

    /// Mark the session closed. Idempotent; returns false on repeat calls.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    /// Close this session and open a fresh one in place: new id, zeroed
    /// extremes, volume and counters. Returns the retired session's id so the
    /// caller can finalize its store row.
    pub fn rotate(&mut self, started_at: u64) -> Uuid {
        let retired = self.id;
        self.close();
        *self = SessionTracker::open(self.mode, std::mem::take(&mut self.symbols), started_at);
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_low_volume_tracking() {
        let mut session = SessionTracker::open(RunMode::Demo, vec!["NQ.c.0".to_string()], 0);
        session.on_trade(100.0, 5);
        session.on_trade(102.0, 3);
        session.on_trade(99.0, 2);
        assert_eq!(session.session_high(), 102.0);
        assert_eq!(session.session_low(), 99.0);
        assert_eq!(session.total_volume(), 10);
    }

    #[test]
    fn test_empty_session_reports_current_price_extremes() {
        let session = SessionTracker::open(RunMode::Demo, vec![], 0);
        assert_eq!(session.session_high(), 0.0);
        assert_eq!(session.session_low(), 0.0);
    }

    #[test]
    fn test_per_kind_counters_and_win_rate() {
        let mut session = SessionTracker::open(RunMode::Live, vec![], 0);
        session.on_signal(SignalKind::DeltaFlip, Direction::Bullish);
        session.on_signal(SignalKind::DeltaFlip, Direction::Bearish);
        session.on_signal(SignalKind::DeltaFlip, Direction::Bullish);
        session.on_outcome(SignalKind::DeltaFlip, SignalOutcome::Win);
        session.on_outcome(SignalKind::DeltaFlip, SignalOutcome::Win);
        session.on_outcome(SignalKind::DeltaFlip, SignalOutcome::Loss);

        let stats = session.stats_msg();
        assert_eq!(stats.delta_flips.count, 3);
        assert_eq!(stats.delta_flips.bullish_count, 2);
        assert_eq!(stats.delta_flips.bearish_count, 1);
        assert_eq!(stats.delta_flips.wins, 2);
        assert!((stats.delta_flips.win_rate - 66.666).abs() < 0.01);
        // untouched kinds stay zeroed
        assert_eq!(stats.confluences.count, 0);
    }

    #[test]
    fn test_average_moves() {
        let mut session = SessionTracker::open(RunMode::Replay, vec![], 0);
        session.on_mark_filled(SignalKind::Absorption, 1.0, false);
        session.on_mark_filled(SignalKind::Absorption, 3.0, false);
        session.on_mark_filled(SignalKind::Absorption, -2.0, true);
        let stats = session.stats_msg();
        assert!((stats.absorptions.avg_move_1m - 2.0).abs() < 1e-9);
        assert!((stats.absorptions.avg_move_5m - (-2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = SessionTracker::open(RunMode::Demo, vec![], 0);
        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
    }

    #[test]
    fn test_rotate_opens_a_fresh_session() {
        let mut session = SessionTracker::open(RunMode::Live, vec!["NQ.c.0".to_string()], 100);
        session.on_trade(105.0, 10);
        session.on_signal(SignalKind::Absorption, Direction::Bullish);
        let old_id = session.id();

        let retired = session.rotate(5_000);
        assert_eq!(retired, old_id);
        assert_ne!(session.id(), old_id);
        assert!(!session.is_closed());
        assert_eq!(session.started_at(), 5_000);
        assert_eq!(session.total_volume(), 0);
        assert_eq!(session.stats_msg().absorptions.count, 0);
        assert_eq!(session.symbols(), &["NQ.c.0".to_string()]);
        assert_eq!(session.mode(), RunMode::Live);
    }
}
