// Absorption Detector - aggressive flow that fails to move price
// Per-level accumulators with a monotone strength ladder and idle expiry

use std::collections::HashMap;

use crate::core::config::DetectorThresholds;
use crate::core::types::{Aggressor, Direction};
use crate::detect::buckets::BucketTrade;
use crate::detect::profile::KeyLevels;

/// Which aggressive side is being absorbed by resting liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsorptionKind {
    Buying,
    Selling,
}

impl AbsorptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsorptionKind::Buying => "buying",
            AbsorptionKind::Selling => "selling",
        }
    }

    /// Absorbed buying means sellers are defending: bearish. Symmetric for
    /// absorbed selling.
    pub fn direction(&self) -> Direction {
        match self {
            AbsorptionKind::Buying => Direction::Bearish,
            AbsorptionKind::Selling => Direction::Bullish,
        }
    }
}

/// Strength ladder. Progression is monotone because counts and totals only
/// grow until the accumulator expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Weak,
    Medium,
    Strong,
    Defended,
}

impl Strength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Weak => "weak",
            Strength::Medium => "medium",
            Strength::Strong => "strong",
            Strength::Defended => "defended",
        }
    }
}

#[derive(Debug, Clone)]
struct Accumulator {
    price: f64,
    kind: AbsorptionKind,
    total_absorbed: i64,
    event_count: u32,
    first_seen: u64,
    last_seen: u64,
    strength: Strength,
}

/// Emitted on every transition to medium or higher.
#[derive(Debug, Clone)]
pub struct AbsorptionEvent {
    pub timestamp: u64,
    pub price: f64,
    pub kind: AbsorptionKind,
    pub strength: Strength,
    pub event_count: u32,
    pub total_absorbed: i64,
    /// Bucket delta at classification time.
    pub delta: i64,
    /// Bucket price change at classification time.
    pub price_change: f64,
    pub at_key_level: bool,
    pub against_trend: bool,
}

/// Once-per-second snapshot of a live accumulator.
#[derive(Debug, Clone)]
pub struct AbsorptionZone {
    pub price: f64,
    pub kind: AbsorptionKind,
    pub total_absorbed: i64,
    pub event_count: u32,
    pub first_seen: u64,
    pub last_seen: u64,
    pub strength: Strength,
    pub at_key_level: bool,
    pub against_trend: bool,
}

pub struct AbsorptionDetector {
    accumulators: HashMap<i64, Accumulator>,
    tick: f64,
    min_size: u32,
    idle_ms: u64,
    key_level_ticks: f64,
    ladder: [(Strength, (u32, i64)); 4],
    events_emitted: u64,
}

impl AbsorptionDetector {
    pub fn new(tick: f64, thresholds: &DetectorThresholds) -> Self {
        Self {
            accumulators: HashMap::new(),
            tick,
            min_size: thresholds.absorption_min_size,
            idle_ms: thresholds.absorption_idle_secs * 1000,
            key_level_ticks: thresholds.key_level_ticks,
            ladder: [
                (Strength::Defended, thresholds.absorption_defended),
                (Strength::Strong, thresholds.absorption_strong),
                (Strength::Medium, thresholds.absorption_medium),
                (Strength::Weak, thresholds.absorption_weak),
            ],
            events_emitted: 0,
        }
    }

    fn key_for(&self, price: f64) -> i64 {
        (price / self.tick).floor() as i64
    }

    /// Both rungs of a ladder step are required; failing either drops to the
    /// step below.
    fn strength_for(&self, event_count: u32, total_absorbed: i64) -> Strength {
        for (strength, (min_count, min_total)) in self.ladder {
            if event_count >= min_count && total_absorbed >= min_total {
                return strength;
            }
        }
        Strength::Weak
    }

    fn at_key_level(&self, price: f64, key_levels: Option<&KeyLevels>) -> bool {
        let Some(levels) = key_levels else {
            return false;
        };
        let tolerance = self.key_level_ticks * self.tick;
        (price - levels.poc).abs() <= tolerance
            || (price - levels.value_area_high).abs() <= tolerance
            || (price - levels.value_area_low).abs() <= tolerance
    }

    fn against_trend(kind: AbsorptionKind, cvd_sign: i64) -> bool {
        match kind.direction() {
            Direction::Bearish => cvd_sign > 0,
            Direction::Bullish => cvd_sign < 0,
        }
    }

    /// Classify a closed bucket's trades. Buying absorption: a large buy in a
    /// bucket whose price failed to rise; selling absorption symmetric.
    /// Returns an event per accumulator transition to medium or higher.
    pub fn on_bucket_close(
        &mut self,
        trades: &[BucketTrade],
        price_change: f64,
        bucket_delta: i64,
        now: u64,
        key_levels: Option<&KeyLevels>,
        cvd_sign: i64,
    ) -> Vec<AbsorptionEvent> {
        let mut events = Vec::new();

        for trade in trades {
            if trade.size < self.min_size {
                continue;
            }
            let kind = match trade.aggressor {
                Aggressor::Buy if price_change <= 0.0 => AbsorptionKind::Buying,
                Aggressor::Sell if price_change >= 0.0 => AbsorptionKind::Selling,
                _ => continue,
            };

            let key = self.key_for(trade.price);
            let level_price = key as f64 * self.tick;

            // update under the map borrow, copy out, then grade
            let (event_count, total_absorbed, prev) = {
                let accumulator = self.accumulators.entry(key).or_insert(Accumulator {
                    price: level_price,
                    kind,
                    total_absorbed: 0,
                    event_count: 0,
                    first_seen: now,
                    last_seen: now,
                    strength: Strength::Weak,
                });
                accumulator.kind = kind;
                accumulator.total_absorbed += trade.size as i64;
                accumulator.event_count += 1;
                accumulator.last_seen = now;
                (
                    accumulator.event_count,
                    accumulator.total_absorbed,
                    accumulator.strength,
                )
            };

            let next = self.strength_for(event_count, total_absorbed);
            if let Some(accumulator) = self.accumulators.get_mut(&key) {
                accumulator.strength = next;
            }

            // emit on each upward step at medium or above; weak stays silent
            if next > prev && next >= Strength::Medium {
                let event = AbsorptionEvent {
                    timestamp: now,
                    price: level_price,
                    kind,
                    strength: next,
                    event_count,
                    total_absorbed,
                    delta: bucket_delta,
                    price_change,
                    at_key_level: self.at_key_level(level_price, key_levels),
                    against_trend: Self::against_trend(kind, cvd_sign),
                };
                self.events_emitted += 1;
                events.push(event);
            }
        }

        events
    }

    /// Drop accumulators idle beyond the expiry window. Returns how many
    /// expired.
    pub fn prune(&mut self, now: u64) -> usize {
        let before = self.accumulators.len();
        let idle_ms = self.idle_ms;
        self.accumulators
            .retain(|_, acc| now.saturating_sub(acc.last_seen) <= idle_ms);
        before - self.accumulators.len()
    }

    /// Live zones: every active accumulator, tagged with current context.
    pub fn zones(&self, key_levels: Option<&KeyLevels>, cvd_sign: i64) -> Vec<AbsorptionZone> {
        let mut zones: Vec<AbsorptionZone> = self
            .accumulators
            .values()
            .map(|acc| AbsorptionZone {
                price: acc.price,
                kind: acc.kind,
                total_absorbed: acc.total_absorbed,
                event_count: acc.event_count,
                first_seen: acc.first_seen,
                last_seen: acc.last_seen,
                strength: acc.strength,
                at_key_level: self.at_key_level(acc.price, key_levels),
                against_trend: Self::against_trend(acc.kind, cvd_sign),
            })
            .collect();
        zones.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        zones
    }

    pub fn active_zone_count(&self) -> usize {
        self.accumulators.len()
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AbsorptionDetector {
        AbsorptionDetector::new(0.25, &DetectorThresholds::default())
    }

    fn big_buy(price: f64, size: u32) -> BucketTrade {
        BucketTrade {
            price,
            size,
            aggressor: Aggressor::Buy,
        }
    }

    fn big_sell(price: f64, size: u32) -> BucketTrade {
        BucketTrade {
            price,
            size,
            aggressor: Aggressor::Sell,
        }
    }

    #[test]
    fn test_strength_ladder_requires_both_thresholds() {
        let d = detector();
        assert_eq!(d.strength_for(1, 20), Strength::Weak);
        assert_eq!(d.strength_for(3, 100), Strength::Medium);
        // enough events but one contract short of strong
        assert_eq!(d.strength_for(5, 299), Strength::Medium);
        assert_eq!(d.strength_for(5, 300), Strength::Strong);
        // enough volume but too few events
        assert_eq!(d.strength_for(4, 600), Strength::Medium);
        assert_eq!(d.strength_for(8, 600), Strength::Defended);
    }

    #[test]
    fn test_progression_emits_at_medium_strong_defended() {
        let mut d = detector();
        let mut emitted = Vec::new();
        // eight 100-lot buys, one per second, price never rises
        for second in 0..8u64 {
            let events = d.on_bucket_close(
                &[big_buy(100.0, 100)],
                0.0,
                100,
                second * 1000,
                None,
                0,
            );
            emitted.extend(events);
        }
        let strengths: Vec<Strength> = emitted.iter().map(|e| e.strength).collect();
        assert_eq!(
            strengths,
            vec![Strength::Medium, Strength::Strong, Strength::Defended]
        );
        assert_eq!(emitted[0].event_count, 3);
        assert_eq!(emitted[1].event_count, 5);
        assert_eq!(emitted[2].event_count, 8);
        assert_eq!(emitted[2].total_absorbed, 800);
    }

    #[test]
    fn test_small_trades_are_ignored() {
        let mut d = detector();
        let events = d.on_bucket_close(&[big_buy(100.0, 19)], 0.0, 19, 0, None, 0);
        assert!(events.is_empty());
        assert_eq!(d.active_zone_count(), 0);
    }

    #[test]
    fn test_rising_price_is_not_buying_absorption() {
        let mut d = detector();
        let events = d.on_bucket_close(&[big_buy(100.0, 50)], 0.25, 50, 0, None, 0);
        assert!(events.is_empty());
        // but a falling bucket absorbs the sell side
        let events = d.on_bucket_close(&[big_sell(100.0, 50)], 0.25, -50, 1000, None, 0);
        assert_eq!(d.active_zone_count(), 1);
        assert!(events.is_empty(), "first event is weak, not broadcast");
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(AbsorptionKind::Buying.direction(), Direction::Bearish);
        assert_eq!(AbsorptionKind::Selling.direction(), Direction::Bullish);
    }

    #[test]
    fn test_against_trend_tag() {
        let mut d = detector();
        // buying absorbed (bearish) while CVD is positive: against trend
        for second in 0..3u64 {
            let events =
                d.on_bucket_close(&[big_buy(100.0, 50)], 0.0, 50, second * 1000, None, 1);
            if let Some(event) = events.first() {
                assert!(event.against_trend);
            }
        }
    }

    #[test]
    fn test_at_key_level_tolerance() {
        let d = detector();
        let levels = KeyLevels {
            poc: 100.0,
            value_area_high: 105.0,
            value_area_low: 95.0,
        };
        assert!(d.at_key_level(100.25, Some(&levels)));
        assert!(!d.at_key_level(100.75, Some(&levels)));
        assert!(d.at_key_level(95.0, Some(&levels)));
        assert!(!d.at_key_level(95.0, None));
    }

    #[test]
    fn test_idle_accumulators_expire() {
        let mut d = detector();
        d.on_bucket_close(&[big_buy(100.0, 50)], 0.0, 50, 0, None, 0);
        assert_eq!(d.active_zone_count(), 1);
        // 5 minutes of silence
        assert_eq!(d.prune(300_001), 1);
        assert_eq!(d.active_zone_count(), 0);
    }

    #[test]
    fn test_zones_snapshot_sorted_by_price() {
        let mut d = detector();
        d.on_bucket_close(
            &[big_buy(101.0, 50), big_buy(99.0, 50)],
            0.0,
            100,
            0,
            None,
            0,
        );
        let zones = d.zones(None, 0);
        assert_eq!(zones.len(), 2);
        assert!(zones[0].price < zones[1].price);
        assert_eq!(zones[0].strength, Strength::Weak);
    }
}
