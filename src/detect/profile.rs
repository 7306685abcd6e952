// Volume Profile - price→(buy, sell, total) histogram per symbol
// Derives POC, the 70% value area, and low-volume-node zones

use std::collections::BTreeMap;

use crate::core::types::{PriceLevel, Trade};

/// Key levels consumers anchor on: point of control and value-area bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyLevels {
    pub poc: f64,
    pub value_area_high: f64,
    pub value_area_low: f64,
}

/// A run of adjacent low-volume nodes, reported at the mean price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LvnZone {
    pub price: f64,
    pub price_low: f64,
    pub price_high: f64,
    pub level_count: u32,
}

/// Append-only histogram over quantized price levels. Mutated only by the
/// ingest task; everything else sees per-second snapshots.
pub struct VolumeProfile {
    levels: BTreeMap<i64, PriceLevel>,
    tick: f64,
    value_area_fraction: f64,
    lvn_mean_fraction: f64,
    lvn_group_ticks: i64,
    last_price: f64,
    total_volume: u64,
}

impl VolumeProfile {
    pub fn new(
        tick: f64,
        value_area_fraction: f64,
        lvn_mean_fraction: f64,
        lvn_group_ticks: i64,
    ) -> Self {
        Self {
            levels: BTreeMap::new(),
            tick,
            value_area_fraction,
            lvn_mean_fraction,
            lvn_group_ticks,
            last_price: 0.0,
            total_volume: 0,
        }
    }

    pub fn tick(&self) -> f64 {
        self.tick
    }

    fn key_for(&self, price: f64) -> i64 {
        (price / self.tick).floor() as i64
    }

    fn price_for(&self, key: i64) -> f64 {
        key as f64 * self.tick
    }

    pub fn add_trade(&mut self, trade: &Trade) {
        let key = self.key_for(trade.price);
        let price = self.price_for(key);
        self.levels
            .entry(key)
            .or_insert_with(|| PriceLevel::new(price))
            .record(trade.aggressor, trade.size);
        self.total_volume += trade.size as u64;
        self.last_price = trade.price;
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    /// Iterate (tick_key, level) ascending by price. The stacked-imbalance
    /// scan walks this ladder.
    pub fn ladder(&self) -> impl Iterator<Item = (&i64, &PriceLevel)> {
        self.levels.iter()
    }

    /// Point of control: argmax total volume, ties broken by proximity to the
    /// current price.
    pub fn poc(&self) -> Option<f64> {
        let last = self.last_price;
        self.levels
            .values()
            .max_by(|a, b| {
                a.total_volume.cmp(&b.total_volume).then_with(|| {
                    // closer to current price wins the tie
                    (b.price - last)
                        .abs()
                        .partial_cmp(&(a.price - last).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            })
            .map(|level| level.price)
    }

    /// Value area: greedy expansion from POC toward the larger neighbor until
    /// the covered volume reaches the configured fraction of the total.
    /// A profile with a single level collapses to VAH = VAL = POC.
    pub fn value_area(&self) -> Option<(f64, f64)> {
        if self.levels.is_empty() {
            return None;
        }

        let target = (self.total_volume as f64 * self.value_area_fraction).ceil() as u64;
        let poc = self.poc()?;
        let poc_key = self.key_for(poc);

        let mut covered = self.levels.get(&poc_key).map_or(0, |l| l.total_volume);
        let mut high_key = poc_key;
        let mut low_key = poc_key;

        while covered < target {
            let above = self.levels.get(&(high_key + 1)).map_or(0, |l| l.total_volume);
            let below = self.levels.get(&(low_key - 1)).map_or(0, |l| l.total_volume);

            if above == 0 && below == 0 {
                break;
            }
            if above >= below {
                high_key += 1;
                covered += above;
            } else {
                low_key -= 1;
                covered += below;
            }
        }

        Some((self.price_for(high_key), self.price_for(low_key)))
    }

    pub fn key_levels(&self) -> Option<KeyLevels> {
        let poc = self.poc()?;
        let (value_area_high, value_area_low) = self.value_area()?;
        Some(KeyLevels {
            poc,
            value_area_high,
            value_area_low,
        })
    }

    fn mean_level_volume(&self) -> f64 {
        if self.levels.is_empty() {
            0.0
        } else {
            self.total_volume as f64 / self.levels.len() as f64
        }
    }

    /// Low-volume nodes: traded levels well below the mean, merged into zones
    /// when within `lvn_group_ticks` of each other.
    pub fn lvn_zones(&self) -> Vec<LvnZone> {
        let cutoff = self.mean_level_volume() * self.lvn_mean_fraction;
        if cutoff <= 0.0 {
            return Vec::new();
        }

        let mut zones: Vec<LvnZone> = Vec::new();
        let mut run: Vec<i64> = Vec::new();

        let mut flush = |run: &mut Vec<i64>, zones: &mut Vec<LvnZone>| {
            if run.is_empty() {
                return;
            }
            let low = self.price_for(run[0]);
            let high = self.price_for(*run.last().unwrap());
            let mean: f64 =
                run.iter().map(|k| self.price_for(*k)).sum::<f64>() / run.len() as f64;
            zones.push(LvnZone {
                price: mean,
                price_low: low,
                price_high: high,
                level_count: run.len() as u32,
            });
            run.clear();
        };

        for (key, level) in &self.levels {
            let thin = level.total_volume > 0 && (level.total_volume as f64) < cutoff;
            if thin {
                if let Some(&prev) = run.last() {
                    if key - prev > self.lvn_group_ticks {
                        flush(&mut run, &mut zones);
                    }
                }
                run.push(*key);
            }
        }
        flush(&mut run, &mut zones);
        zones
    }

    /// Sorted copy of all levels for broadcast.
    pub fn snapshot_levels(&self) -> Vec<PriceLevel> {
        self.levels.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Aggressor;

    fn make_trade(price: f64, size: u32, aggressor: Aggressor) -> Trade {
        Trade {
            trade_id: 0,
            symbol: "NQ.c.0".to_string(),
            timestamp: 0,
            price,
            size,
            aggressor,
        }
    }

    fn profile_with_tick(tick: f64) -> VolumeProfile {
        VolumeProfile::new(tick, 0.70, 0.30, 3)
    }

    #[test]
    fn test_quantization_floors_to_tick() {
        let mut profile = profile_with_tick(0.25);
        profile.add_trade(&make_trade(100.30, 5, Aggressor::Buy));
        let levels = profile.snapshot_levels();
        assert_eq!(levels.len(), 1);
        assert!((levels[0].price - 100.25).abs() < 1e-9);
    }

    #[test]
    fn test_level_totals_are_consistent() {
        let mut profile = profile_with_tick(0.25);
        profile.add_trade(&make_trade(100.0, 5, Aggressor::Buy));
        profile.add_trade(&make_trade(100.0, 3, Aggressor::Sell));
        profile.add_trade(&make_trade(100.25, 2, Aggressor::Buy));
        for level in profile.snapshot_levels() {
            assert_eq!(level.total_volume, level.buy_volume + level.sell_volume);
        }
        assert_eq!(profile.total_volume(), 10);
    }

    #[test]
    fn test_poc_is_argmax_total() {
        let mut profile = profile_with_tick(1.0);
        profile.add_trade(&make_trade(100.0, 5, Aggressor::Buy));
        profile.add_trade(&make_trade(101.0, 10, Aggressor::Buy));
        profile.add_trade(&make_trade(102.0, 3, Aggressor::Sell));
        assert_eq!(profile.poc(), Some(101.0));
    }

    #[test]
    fn test_poc_tie_breaks_toward_current_price() {
        let mut profile = profile_with_tick(1.0);
        profile.add_trade(&make_trade(100.0, 10, Aggressor::Buy));
        profile.add_trade(&make_trade(105.0, 10, Aggressor::Buy));
        // last trade near 105, so the tie resolves there
        profile.add_trade(&make_trade(104.0, 1, Aggressor::Buy));
        assert_eq!(profile.poc(), Some(105.0));
    }

    #[test]
    fn test_value_area_single_level_collapses_to_poc() {
        let mut profile = profile_with_tick(0.25);
        profile.add_trade(&make_trade(100.0, 50, Aggressor::Buy));
        let (vah, val) = profile.value_area().unwrap();
        assert_eq!(vah, val);
        assert_eq!(Some(vah), profile.poc());
    }

    #[test]
    fn test_value_area_covers_seventy_percent() {
        let mut profile = profile_with_tick(1.0);
        // POC at 101 with heavy shoulders
        profile.add_trade(&make_trade(99.0, 5, Aggressor::Buy));
        profile.add_trade(&make_trade(100.0, 20, Aggressor::Buy));
        profile.add_trade(&make_trade(101.0, 40, Aggressor::Buy));
        profile.add_trade(&make_trade(102.0, 25, Aggressor::Sell));
        profile.add_trade(&make_trade(103.0, 10, Aggressor::Sell));

        let (vah, val) = profile.value_area().unwrap();
        // total 100, target 70: 40(POC) + 25(above) + 20(below) = 85
        assert_eq!(val, 100.0);
        assert_eq!(vah, 102.0);
    }

    #[test]
    fn test_lvn_zones_group_adjacent_thin_levels() {
        let mut profile = profile_with_tick(1.0);
        profile.add_trade(&make_trade(100.0, 100, Aggressor::Buy));
        profile.add_trade(&make_trade(101.0, 100, Aggressor::Buy));
        profile.add_trade(&make_trade(102.0, 2, Aggressor::Sell));
        profile.add_trade(&make_trade(103.0, 3, Aggressor::Sell));
        profile.add_trade(&make_trade(110.0, 100, Aggressor::Buy));

        // mean = 305/5 = 61, cutoff = 18.3: levels 102 and 103 qualify and
        // merge into one zone
        let zones = profile.lvn_zones();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].level_count, 2);
        assert!((zones[0].price - 102.5).abs() < 1e-9);
        assert_eq!(zones[0].price_low, 102.0);
        assert_eq!(zones[0].price_high, 103.0);
    }

    #[test]
    fn test_lvn_zones_split_when_far_apart() {
        let mut profile = profile_with_tick(1.0);
        profile.add_trade(&make_trade(100.0, 100, Aggressor::Buy));
        profile.add_trade(&make_trade(101.0, 1, Aggressor::Sell));
        profile.add_trade(&make_trade(110.0, 1, Aggressor::Sell));
        profile.add_trade(&make_trade(111.0, 100, Aggressor::Buy));

        let zones = profile.lvn_zones();
        assert_eq!(zones.len(), 2);
    }

    #[test]
    fn test_empty_profile_has_no_derivations() {
        let profile = profile_with_tick(0.25);
        assert!(profile.poc().is_none());
        assert!(profile.value_area().is_none());
        assert!(profile.lvn_zones().is_empty());
    }
}
