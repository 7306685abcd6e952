// Outcome Tracker - realized result of each signal after fixed horizons
// Marks at +60s and +300s record the last observed trade price; the 5-minute
// mark grades win/loss/breakeven against a tick threshold

use uuid::Uuid;

use crate::core::types::{Direction, SignalKind, SignalOutcome};

const ONE_MINUTE_MS: u64 = 60_000;
const FIVE_MINUTES_MS: u64 = 300_000;

/// A signal whose horizons have not all passed yet.
#[derive(Debug, Clone)]
struct PendingMark {
    id: Uuid,
    kind: SignalKind,
    direction: Direction,
    price_at_emit: f64,
    emitted_at: u64,
    price_after_1m: Option<f64>,
}

/// Store-bound update produced when a horizon fills.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeUpdate {
    pub id: Uuid,
    pub kind: SignalKind,
    pub direction: Direction,
    pub price_at_emit: f64,
    pub price_after_1m: Option<f64>,
    pub price_after_5m: Option<f64>,
    /// Set exactly once, when the 5-minute mark grades the signal.
    pub outcome: Option<SignalOutcome>,
}

/// Driven by clock ticks flowing through the ingest task, so a replay of the
/// same input grades identically regardless of playback speed. Signals still
/// pending when the session ends simply stay pending; that state is terminal.
pub struct OutcomeTracker {
    pending: Vec<PendingMark>,
    win_threshold: f64,
    graded: u64,
}

impl OutcomeTracker {
    pub fn new(win_ticks: f64, tick: f64) -> Self {
        Self {
            pending: Vec::new(),
            win_threshold: win_ticks * tick,
            graded: 0,
        }
    }

    pub fn register(
        &mut self,
        id: Uuid,
        kind: SignalKind,
        direction: Direction,
        price_at_emit: f64,
        emitted_at: u64,
    ) {
        self.pending.push(PendingMark {
            id,
            kind,
            direction,
            price_at_emit,
            emitted_at,
            price_after_1m: None,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn graded(&self) -> u64 {
        self.graded
    }

    fn grade(&self, mark: &PendingMark, price_after_5m: f64) -> SignalOutcome {
        let favorable = match mark.direction {
            Direction::Bullish => price_after_5m - mark.price_at_emit,
            Direction::Bearish => mark.price_at_emit - price_after_5m,
        };
        if favorable >= self.win_threshold {
            SignalOutcome::Win
        } else if favorable <= -self.win_threshold {
            SignalOutcome::Loss
        } else {
            SignalOutcome::Breakeven
        }
    }

    /// Advance to `now`, filling any horizon that has passed with the last
    /// observed trade price. Updates come out in registration order.
    pub fn on_tick(&mut self, now: u64, last_price: f64) -> Vec<OutcomeUpdate> {
        let mut updates = Vec::new();

        // fill 1-minute marks still ahead of the 5-minute horizon
        for mark in self.pending.iter_mut() {
            let age = now.saturating_sub(mark.emitted_at);
            if mark.price_after_1m.is_none() && (ONE_MINUTE_MS..FIVE_MINUTES_MS).contains(&age) {
                mark.price_after_1m = Some(last_price);
                updates.push(OutcomeUpdate {
                    id: mark.id,
                    kind: mark.kind,
                    direction: mark.direction,
                    price_at_emit: mark.price_at_emit,
                    price_after_1m: mark.price_after_1m,
                    price_after_5m: None,
                    outcome: None,
                });
            }
        }

        // grade everything past the 5-minute horizon, in registration order
        let mut index = 0;
        while index < self.pending.len() {
            if now.saturating_sub(self.pending[index].emitted_at) < FIVE_MINUTES_MS {
                index += 1;
                continue;
            }
            let mark = self.pending.remove(index);
            // a gap can blow past both horizons in one tick; the same price
            // then stands for both marks. An update only carries the 1m
            // price when this tick filled it, so consumers can tell a fresh
            // fill from one reported earlier.
            let fresh_1m = mark.price_after_1m.is_none().then_some(last_price);
            let outcome = self.grade(&mark, last_price);
            self.graded += 1;
            updates.push(OutcomeUpdate {
                id: mark.id,
                kind: mark.kind,
                direction: mark.direction,
                price_at_emit: mark.price_at_emit,
                price_after_1m: fresh_1m,
                price_after_5m: Some(last_price),
                outcome: Some(outcome),
            });
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> OutcomeTracker {
        // W = 4 ticks of 0.25: one full point
        OutcomeTracker::new(4.0, 0.25)
    }

    fn register_one(t: &mut OutcomeTracker, direction: Direction, price: f64) -> Uuid {
        let id = Uuid::new_v4();
        t.register(id, SignalKind::DeltaFlip, direction, price, 0);
        id
    }

    #[test]
    fn test_marks_fill_in_order() {
        let mut t = tracker();
        let id = register_one(&mut t, Direction::Bullish, 100.0);

        assert!(t.on_tick(59_999, 100.5).is_empty());

        let updates = t.on_tick(60_000, 101.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, id);
        assert_eq!(updates[0].price_after_1m, Some(101.0));
        assert!(updates[0].outcome.is_none());
        assert_eq!(t.pending_count(), 1);

        let updates = t.on_tick(300_000, 102.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].price_after_5m, Some(102.0));
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Win));
        assert_eq!(t.pending_count(), 0);
    }

    #[test]
    fn test_bullish_grading_thresholds() {
        // +2.00 on a 1.00 threshold: win
        let mut t = tracker();
        register_one(&mut t, Direction::Bullish, 100.0);
        t.on_tick(60_000, 101.0);
        let updates = t.on_tick(300_000, 102.0);
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Win));

        // -1.25: loss
        let mut t = tracker();
        register_one(&mut t, Direction::Bullish, 100.0);
        t.on_tick(60_000, 100.0);
        let updates = t.on_tick(300_000, 98.75);
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Loss));

        // +0.50 inside the band: breakeven
        let mut t = tracker();
        register_one(&mut t, Direction::Bullish, 100.0);
        t.on_tick(60_000, 100.0);
        let updates = t.on_tick(300_000, 100.5);
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Breakeven));
    }

    #[test]
    fn test_bearish_grading_is_mirrored() {
        let mut t = tracker();
        register_one(&mut t, Direction::Bearish, 100.0);
        t.on_tick(60_000, 99.5);
        let updates = t.on_tick(300_000, 98.5);
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Win));

        let mut t = tracker();
        register_one(&mut t, Direction::Bearish, 100.0);
        t.on_tick(60_000, 100.0);
        let updates = t.on_tick(300_000, 101.5);
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Loss));
    }

    #[test]
    fn test_exact_threshold_is_a_win() {
        let mut t = tracker();
        register_one(&mut t, Direction::Bullish, 100.0);
        t.on_tick(60_000, 100.0);
        let updates = t.on_tick(300_000, 101.0);
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Win));
    }

    #[test]
    fn test_clock_jump_fills_both_marks_at_once() {
        let mut t = tracker();
        register_one(&mut t, Direction::Bullish, 100.0);
        let updates = t.on_tick(400_000, 103.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].price_after_1m, Some(103.0));
        assert_eq!(updates[0].price_after_5m, Some(103.0));
        assert_eq!(updates[0].outcome, Some(SignalOutcome::Win));
    }

    #[test]
    fn test_multiple_signals_independent_schedules() {
        let mut t = tracker();
        let early = Uuid::new_v4();
        let late = Uuid::new_v4();
        t.register(early, SignalKind::Absorption, Direction::Bullish, 100.0, 0);
        t.register(late, SignalKind::Confluence, Direction::Bearish, 100.0, 120_000);

        let updates = t.on_tick(300_000, 101.5);
        // early signal grades; late one only fills its 1m mark (age 180s)
        assert_eq!(updates.len(), 2);
        let graded = updates.iter().find(|u| u.id == early).unwrap();
        assert!(graded.outcome.is_some());
        let partial = updates.iter().find(|u| u.id == late).unwrap();
        assert_eq!(partial.price_after_1m, Some(101.5));
        assert!(partial.outcome.is_none());
        assert_eq!(t.pending_count(), 1);
    }
}
