// Per-Second Bucket Aggregation
// One open bucket per symbol keyed by floor(timestamp_ms / 1000); closes on
// rollover or idle timeout and emits an Aggregate

use std::time::Instant;

use crate::core::types::{Aggregate, Aggressor, Trade};

/// Trade fields the close-time detectors need from a finished bucket.
#[derive(Debug, Clone)]
pub struct BucketTrade {
    pub price: f64,
    pub size: u32,
    pub aggressor: Aggressor,
}

/// The open 1-second window for one symbol.
#[derive(Debug)]
pub struct SecondBucket {
    symbol: String,
    bucket_index: u64,
    first_price: f64,
    last_price: f64,
    buy_volume: u32,
    sell_volume: u32,
    price_volume_sum: f64,
    trades: Vec<BucketTrade>,
    /// Wall-clock arrival of the most recent trade, for the idle close rule.
    last_activity: Instant,
}

/// A closed bucket: the aggregate plus the raw trades that built it.
#[derive(Debug)]
pub struct ClosedBucket {
    pub aggregate: Aggregate,
    pub trades: Vec<BucketTrade>,
    /// last − first price over the bucket.
    pub price_change: f64,
}

impl SecondBucket {
    fn open(trade: &Trade) -> Self {
        let mut bucket = Self {
            symbol: trade.symbol.clone(),
            bucket_index: trade.bucket(),
            first_price: trade.price,
            last_price: trade.price,
            buy_volume: 0,
            sell_volume: 0,
            price_volume_sum: 0.0,
            trades: Vec::new(),
            last_activity: Instant::now(),
        };
        bucket.absorb(trade);
        bucket
    }

    fn absorb(&mut self, trade: &Trade) {
        match trade.aggressor {
            Aggressor::Buy => self.buy_volume += trade.size,
            Aggressor::Sell => self.sell_volume += trade.size,
        }
        self.price_volume_sum += trade.price * trade.size as f64;
        self.last_price = trade.price;
        self.trades.push(BucketTrade {
            price: trade.price,
            size: trade.size,
            aggressor: trade.aggressor,
        });
        self.last_activity = Instant::now();
    }

    pub fn bucket_index(&self) -> u64 {
        self.bucket_index
    }

    pub fn bucket_end_ms(&self) -> u64 {
        (self.bucket_index + 1) * 1000
    }

    pub fn idle_secs(&self) -> f64 {
        self.last_activity.elapsed().as_secs_f64()
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    fn close(self, significant_ratio: f64) -> ClosedBucket {
        let total = self.buy_volume + self.sell_volume;
        let delta = self.buy_volume as i64 - self.sell_volume as i64;
        let vwap = if total > 0 {
            self.price_volume_sum / total as f64
        } else {
            self.last_price
        };
        let dominant_side = if self.buy_volume >= self.sell_volume {
            Aggressor::Buy
        } else {
            Aggressor::Sell
        };
        let significant_imbalance =
            total > 0 && (delta.unsigned_abs() as f64 / total as f64) >= significant_ratio;

        ClosedBucket {
            aggregate: Aggregate {
                symbol: self.symbol,
                bucket_start: self.bucket_index * 1000,
                buy_volume: self.buy_volume,
                sell_volume: self.sell_volume,
                delta,
                vwap,
                dominant_side,
                significant_imbalance,
            },
            price_change: self.last_price - self.first_price,
            trades: self.trades,
        }
    }
}

/// Per-symbol bucket state machine. Aggregates for a symbol come out in
/// strictly increasing bucket order; empty seconds emit nothing.
pub struct BucketAggregator {
    open: Option<SecondBucket>,
    significant_ratio: f64,
    aggregates_emitted: u64,
}

impl BucketAggregator {
    pub fn new(significant_ratio: f64) -> Self {
        Self {
            open: None,
            significant_ratio,
            aggregates_emitted: 0,
        }
    }

    /// Feed one trade. Returns the previous bucket when this trade rolls into
    /// a later one. Trades older than the open bucket fold into it rather
    /// than reopening a closed window.
    pub fn add_trade(&mut self, trade: &Trade) -> Option<ClosedBucket> {
        match self.open.take() {
            None => {
                self.open = Some(SecondBucket::open(trade));
                None
            }
            Some(mut bucket) => {
                if trade.bucket() > bucket.bucket_index() {
                    let closed = bucket.close(self.significant_ratio);
                    self.aggregates_emitted += 1;
                    self.open = Some(SecondBucket::open(trade));
                    Some(closed)
                } else {
                    bucket.absorb(trade);
                    self.open = Some(bucket);
                    None
                }
            }
        }
    }

    /// Idle close for live/demo: flush the open bucket after `idle_secs` of
    /// wall-clock silence.
    pub fn close_if_idle(&mut self, idle_secs: f64) -> Option<ClosedBucket> {
        if self
            .open
            .as_ref()
            .is_some_and(|bucket| bucket.idle_secs() > idle_secs)
        {
            self.flush()
        } else {
            None
        }
    }

    /// Virtual-clock close for replay: flush once the clock passes the
    /// bucket's end.
    pub fn close_if_elapsed(&mut self, now_ms: u64) -> Option<ClosedBucket> {
        if self
            .open
            .as_ref()
            .is_some_and(|bucket| now_ms >= bucket.bucket_end_ms())
        {
            self.flush()
        } else {
            None
        }
    }

    /// Unconditional flush, used on shutdown.
    pub fn flush(&mut self) -> Option<ClosedBucket> {
        let closed = self.open.take().map(|b| b.close(self.significant_ratio));
        if closed.is_some() {
            self.aggregates_emitted += 1;
        }
        closed
    }

    pub fn last_price(&self) -> Option<f64> {
        self.open.as_ref().map(|b| b.last_price())
    }

    pub fn aggregates_emitted(&self) -> u64 {
        self.aggregates_emitted
    }
}
