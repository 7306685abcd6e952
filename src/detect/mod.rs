// Detection layer: per-symbol state machines fed by closed 1-second buckets
//
// Module structure:
// - buckets.rs: per-second aggregation
// - cvd.rs: cumulative volume delta + zero-cross
// - profile.rs: volume profile (POC / value area / LVN zones)
// - absorption.rs: per-level absorption accumulators
// - imbalance.rs: stacked imbalance runs
// - confluence.rs: sliding-window signal agreement
// - window.rs: rolling time window container

pub mod absorption;
pub mod buckets;
pub mod confluence;
pub mod cvd;
pub mod imbalance;
pub mod profile;
pub mod window;

pub use absorption::{AbsorptionDetector, AbsorptionEvent, AbsorptionKind, AbsorptionZone, Strength};
pub use buckets::{BucketAggregator, BucketTrade, ClosedBucket};
pub use confluence::{ConfluenceEngine, ConfluenceEvent};
pub use cvd::{CvdPoint, CvdTracker, DeltaFlipEvent};
pub use imbalance::{StackedImbalanceDetector, StackedImbalanceEvent};
pub use profile::{KeyLevels, LvnZone, VolumeProfile};
pub use window::TimeWindow;

use crate::core::config::DetectorThresholds;
use crate::core::types::{PriceLevel, SignalKind, Trade};

/// Everything one closed bucket produced.
pub struct DetectorOutput {
    pub cvd_point: CvdPoint,
    pub delta_flip: Option<DeltaFlipEvent>,
    pub absorption: Vec<AbsorptionEvent>,
    pub stacked: Option<StackedImbalanceEvent>,
    pub confluence: Option<ConfluenceEvent>,
}

/// Per-second profile snapshot for broadcast.
pub struct ProfileSnapshot {
    pub levels: Vec<PriceLevel>,
    pub key_levels: Option<KeyLevels>,
    pub lvn_zones: Vec<LvnZone>,
}

/// All detector state for one symbol. Owned exclusively by the ingest task;
/// the rest of the system sees messages derived from it.
pub struct DetectorStack {
    symbol: String,
    profile: VolumeProfile,
    cvd: CvdTracker,
    absorption: AbsorptionDetector,
    imbalance: StackedImbalanceDetector,
    confluence: ConfluenceEngine,
}

impl DetectorStack {
    pub fn new(symbol: &str, tick: f64, thresholds: &DetectorThresholds) -> Self {
        Self {
            symbol: symbol.to_string(),
            profile: VolumeProfile::new(
                tick,
                thresholds.value_area_fraction,
                thresholds.lvn_mean_fraction,
                thresholds.lvn_group_ticks,
            ),
            cvd: CvdTracker::new(thresholds.flip_hysteresis),
            absorption: AbsorptionDetector::new(tick, thresholds),
            imbalance: StackedImbalanceDetector::new(
                tick,
                thresholds.stack_imbalance_ratio,
                thresholds.stack_min_levels,
            ),
            confluence: ConfluenceEngine::new(thresholds.confluence_window_ms),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn cvd_value(&self) -> i64 {
        self.cvd.value()
    }

    /// Trade-granular state: the profile histogram.
    pub fn add_trade(&mut self, trade: &Trade) {
        self.profile.add_trade(trade);
    }

    /// Run every bucket-granular detector against a closed bucket. `now` is
    /// the bucket's close instant on the data timeline, which keeps replay
    /// output independent of real pacing.
    pub fn on_bucket_close(&mut self, closed: &ClosedBucket, now: u64) -> DetectorOutput {
        let (cvd_point, delta_flip) = self.cvd.on_aggregate(&closed.aggregate);

        let key_levels = self.profile.key_levels();
        let absorption = self.absorption.on_bucket_close(
            &closed.trades,
            closed.price_change,
            closed.aggregate.delta,
            now,
            key_levels.as_ref(),
            self.cvd.sign(),
        );
        let stacked = self.imbalance.scan(&self.profile, now);

        if let Some(flip) = &delta_flip {
            self.confluence
                .record_tag(SignalKind::DeltaFlip, flip.direction, now);
        }
        for event in &absorption {
            self.confluence
                .record_tag(SignalKind::Absorption, event.kind.direction(), now);
        }
        if let Some(event) = &stacked {
            self.confluence
                .record_tag(SignalKind::StackedImbalance, event.direction, now);
        }
        let confluence = self.confluence.evaluate(closed.aggregate.vwap, now);

        DetectorOutput {
            cvd_point,
            delta_flip,
            absorption,
            stacked,
            confluence,
        }
    }

    pub fn profile_snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            levels: self.profile.snapshot_levels(),
            key_levels: self.profile.key_levels(),
            lvn_zones: self.profile.lvn_zones(),
        }
    }

    pub fn zones_snapshot(&self) -> Vec<AbsorptionZone> {
        self.absorption
            .zones(self.profile.key_levels().as_ref(), self.cvd.sign())
    }

    pub fn prune(&mut self, now: u64) {
        self.absorption.prune(now);
    }
}
