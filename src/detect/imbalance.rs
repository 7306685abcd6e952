// Stacked Imbalance Detector - consecutive one-sided levels on the ladder
// A maximal run of adjacent tick levels all dominated by the same side

use crate::core::types::{Aggressor, Direction, PriceLevel};
use crate::detect::profile::VolumeProfile;

#[derive(Debug, Clone)]
pub struct StackedImbalanceEvent {
    pub timestamp: u64,
    pub side: Aggressor,
    pub direction: Direction,
    pub level_count: u32,
    pub price_high: f64,
    pub price_low: f64,
    pub total_imbalance: i64,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    side: Aggressor,
    low_key: i64,
    high_key: i64,
    level_count: u32,
    total_imbalance: i64,
}

impl Run {
    fn overlaps(&self, other: &Run) -> bool {
        self.side == other.side
            && self.low_key <= other.high_key
            && self.high_key >= other.low_key
    }
}

/// Scans the profile ladder for ≥ `min_levels` consecutive levels where one
/// side holds at least `ratio` of the traded volume. An emitted run stays
/// silent until it grows; once it breaks, a fresh qualifying run emits again.
pub struct StackedImbalanceDetector {
    ratio: f64,
    min_levels: usize,
    tick: f64,
    last_emitted: Option<Run>,
    events_emitted: u64,
}

impl StackedImbalanceDetector {
    pub fn new(tick: f64, ratio: f64, min_levels: usize) -> Self {
        Self {
            ratio,
            min_levels,
            tick,
            last_emitted: None,
            events_emitted: 0,
        }
    }

    fn level_side(&self, level: &PriceLevel) -> Option<Aggressor> {
        let total = level.buy_volume + level.sell_volume;
        let imbalance = level.buy_volume.abs_diff(level.sell_volume);
        if (imbalance as f64) / (total.max(1) as f64) < self.ratio {
            return None;
        }
        if level.buy_volume >= level.sell_volume {
            Some(Aggressor::Buy)
        } else {
            Some(Aggressor::Sell)
        }
    }

    /// The best maximal run currently on the ladder: longest first, then
    /// largest total imbalance.
    fn best_run(&self, profile: &VolumeProfile) -> Option<Run> {
        let mut best: Option<Run> = None;
        let mut current: Option<Run> = None;

        let mut consider = |candidate: Option<Run>, best: &mut Option<Run>| {
            if let Some(run) = candidate {
                if run.level_count as usize >= self.min_levels
                    && best.map_or(true, |b| {
                        run.level_count > b.level_count
                            || (run.level_count == b.level_count
                                && run.total_imbalance > b.total_imbalance)
                    })
                {
                    *best = Some(run);
                }
            }
        };

        for (key, level) in profile.ladder() {
            let side = self.level_side(level);
            let level_delta = level.buy_volume as i64 - level.sell_volume as i64;

            current = match (side, current) {
                (Some(side), Some(mut run)) if run.side == side && *key == run.high_key + 1 => {
                    run.high_key = *key;
                    run.level_count += 1;
                    run.total_imbalance += level_delta.abs();
                    Some(run)
                }
                (Some(side), previous) => {
                    consider(previous, &mut best);
                    Some(Run {
                        side,
                        low_key: *key,
                        high_key: *key,
                        level_count: 1,
                        total_imbalance: level_delta.abs(),
                    })
                }
                (None, previous) => {
                    consider(previous, &mut best);
                    None
                }
            };
        }
        consider(current, &mut best);
        best
    }

    /// Re-scan after a bucket close. Emits when a qualifying run first
    /// appears and again each time its level count grows.
    pub fn scan(&mut self, profile: &VolumeProfile, now: u64) -> Option<StackedImbalanceEvent> {
        let Some(run) = self.best_run(profile) else {
            // run broke; a future stack may emit from scratch
            self.last_emitted = None;
            return None;
        };

        if let Some(last) = self.last_emitted {
            if run.overlaps(&last) && run.level_count <= last.level_count {
                return None;
            }
        }

        self.last_emitted = Some(run);
        self.events_emitted += 1;
        Some(StackedImbalanceEvent {
            timestamp: now,
            side: run.side,
            direction: match run.side {
                Aggressor::Buy => Direction::Bullish,
                Aggressor::Sell => Direction::Bearish,
            },
            level_count: run.level_count,
            price_low: run.low_key as f64 * self.tick,
            price_high: run.high_key as f64 * self.tick,
            total_imbalance: run.total_imbalance,
        })
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Trade;

    fn profile_with(levels: &[(f64, u32, u32)]) -> VolumeProfile {
        let mut profile = VolumeProfile::new(1.0, 0.70, 0.30, 3);
        for (price, buy, sell) in levels {
            if *buy > 0 {
                profile.add_trade(&Trade {
                    trade_id: 0,
                    symbol: "NQ.c.0".to_string(),
                    timestamp: 0,
                    price: *price,
                    size: *buy,
                    aggressor: Aggressor::Buy,
                });
            }
            if *sell > 0 {
                profile.add_trade(&Trade {
                    trade_id: 0,
                    symbol: "NQ.c.0".to_string(),
                    timestamp: 0,
                    price: *price,
                    size: *sell,
                    aggressor: Aggressor::Sell,
                });
            }
        }
        profile
    }

    #[test]
    fn test_three_consecutive_buy_levels_emit_bullish() {
        let profile = profile_with(&[
            (100.0, 10, 0),
            (101.0, 9, 1),
            (102.0, 8, 1),
            (103.0, 0, 1),
        ]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);
        let event = detector.scan(&profile, 5_000).expect("run of 3 emits");
        assert_eq!(event.side, Aggressor::Buy);
        assert_eq!(event.direction, Direction::Bullish);
        assert_eq!(event.level_count, 3);
        assert_eq!(event.price_low, 100.0);
        assert_eq!(event.price_high, 102.0);
        assert_eq!(event.total_imbalance, 10 + 8 + 7);
    }

    #[test]
    fn test_two_levels_are_not_enough() {
        let profile = profile_with(&[(100.0, 10, 0), (101.0, 10, 0)]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);
        assert!(detector.scan(&profile, 0).is_none());
    }

    #[test]
    fn test_gap_breaks_the_run() {
        // 100,101 then a hole at 102 then 103: two short runs, no stack
        let profile = profile_with(&[(100.0, 10, 0), (101.0, 10, 0), (103.0, 10, 0)]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);
        assert!(detector.scan(&profile, 0).is_none());
    }

    #[test]
    fn test_balanced_level_breaks_the_run() {
        let profile = profile_with(&[
            (100.0, 10, 0),
            (101.0, 5, 5),
            (102.0, 10, 0),
            (103.0, 10, 0),
        ]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);
        assert!(detector.scan(&profile, 0).is_none());
    }

    #[test]
    fn test_reemits_only_when_run_grows() {
        let mut profile = profile_with(&[(100.0, 10, 0), (101.0, 10, 0), (102.0, 10, 0)]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);

        assert_eq!(detector.scan(&profile, 0).unwrap().level_count, 3);
        // same ladder: silent
        assert!(detector.scan(&profile, 1_000).is_none());

        // run extends to 4 levels
        profile.add_trade(&Trade {
            trade_id: 0,
            symbol: "NQ.c.0".to_string(),
            timestamp: 0,
            price: 103.0,
            size: 10,
            aggressor: Aggressor::Buy,
        });
        let event = detector.scan(&profile, 2_000).unwrap();
        assert_eq!(event.level_count, 4);
        assert_eq!(event.price_high, 103.0);
    }

    #[test]
    fn test_sell_stack_is_bearish() {
        let profile = profile_with(&[(100.0, 0, 10), (101.0, 1, 9), (102.0, 0, 10)]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);
        let event = detector.scan(&profile, 0).unwrap();
        assert_eq!(event.direction, Direction::Bearish);
    }

    #[test]
    fn test_broken_run_resets_emission() {
        let profile = profile_with(&[(100.0, 10, 0), (101.0, 10, 0), (102.0, 10, 0)]);
        let mut detector = StackedImbalanceDetector::new(1.0, 0.67, 3);
        assert!(detector.scan(&profile, 0).is_some());

        // heavy selling balances the middle level; the stack is gone
        let balanced = profile_with(&[(100.0, 10, 0), (101.0, 10, 10), (102.0, 10, 0)]);
        assert!(detector.scan(&balanced, 1_000).is_none());

        // the same stack re-forming emits again
        assert!(detector.scan(&profile, 2_000).is_some());
    }
}
