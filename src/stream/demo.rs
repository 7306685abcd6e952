// Demo Source - synthetic random-walk trade generator
// Prices walk inside a fixed band; sizes follow the observed heavy-tail mix
// of real futures tape (mostly small lots, occasional blocks)

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::core::clock::wall_now_ms;
use crate::core::error::SourceError;
use crate::core::types::{Aggressor, Trade};
use crate::stream::TradeSource;

const PRICE_FLOOR: f64 = 20_000.0;
const PRICE_CEIL: f64 = 20_300.0;
const BUY_PROBABILITY: f64 = 0.52;

pub struct DemoSource {
    symbol: String,
    tick: f64,
    price: f64,
    trade_id: u64,
    rng: StdRng,
}

impl DemoSource {
    pub fn new(symbol: &str, tick: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            tick,
            price: 20_100.0,
            trade_id: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// 85% one to five lots, 13% mid-size, 2% blocks.
    fn next_size(&mut self) -> u32 {
        let roll = self.rng.gen_range(0..100u32);
        if roll < 85 {
            self.rng.gen_range(1..=5)
        } else if roll < 98 {
            self.rng.gen_range(5..=50)
        } else {
            self.rng.gen_range(50..=150)
        }
    }

    fn step_price(&mut self) {
        let ticks = self.rng.gen_range(0..5) as f64 - 2.0;
        self.price = (self.price + ticks * self.tick).clamp(PRICE_FLOOR, PRICE_CEIL);
    }
}

#[async_trait]
impl TradeSource for DemoSource {
    async fn next(&mut self) -> Result<Option<Trade>, SourceError> {
        let delay = self.rng.gen_range(10..=50u64);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.step_price();
        let aggressor = if self.rng.gen_bool(BUY_PROBABILITY) {
            Aggressor::Buy
        } else {
            Aggressor::Sell
        };
        self.trade_id += 1;

        Ok(Some(Trade {
            trade_id: self.trade_id,
            symbol: self.symbol.clone(),
            timestamp: wall_now_ms(),
            price: self.price,
            size: self.next_size(),
            aggressor,
        }))
    }
}
