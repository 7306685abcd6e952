// Trade Sources - one contract, three implementations
// Live gateway adapter, synthetic generator, and historical replay all yield
// the same lazy, unbounded sequence of normalized trades

pub mod demo;
pub mod live;
pub mod replay;

pub use demo::DemoSource;
pub use live::LiveSource;
pub use replay::ReplaySource;

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use crate::core::config::GatewayConfig;
use crate::core::error::SourceError;
use crate::core::types::Trade;

/// The ingress boundary. `Ok(None)` means the stream is exhausted (replay
/// reached the end of its recording); live and demo never end on their own.
#[async_trait]
pub trait TradeSource: Send {
    async fn next(&mut self) -> Result<Option<Trade>, SourceError>;

    /// Trades that arrived malformed and were dropped.
    fn malformed_count(&self) -> u64 {
        0
    }
}

/// Exponential backoff with jitter: base × 2^attempt, capped, ±jitter.
pub fn backoff_delay(attempt: u32, config: &GatewayConfig) -> Duration {
    let base = config.backoff_base_secs.max(1);
    let cap = config.backoff_cap_secs.max(base);
    let exp = base.saturating_mul(1u64 << attempt.min(10)).min(cap);

    let jitter_ms = config.backoff_jitter_secs * 1000;
    let millis = if jitter_ms > 0 {
        let spread = rand::thread_rng().gen_range(0..=jitter_ms * 2) as i64 - jitter_ms as i64;
        (exp as i64 * 1000 + spread).max(100) as u64
    } else {
        exp * 1000
    };
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = GatewayConfig {
            backoff_jitter_secs: 0,
            ..GatewayConfig::default()
        };
        assert_eq!(backoff_delay(0, &config), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, &config), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, &config), Duration::from_secs(8));
        // capped at 30s no matter how many attempts
        assert_eq!(backoff_delay(10, &config), Duration::from_secs(30));
        assert_eq!(backoff_delay(63, &config), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = GatewayConfig::default();
        for attempt in 0..6 {
            let delay = backoff_delay(attempt, &config);
            let nominal = (config.backoff_base_secs << attempt.min(10))
                .min(config.backoff_cap_secs) as i64
                * 1000;
            let diff = (delay.as_millis() as i64 - nominal).abs();
            assert!(diff <= 1000, "jitter {}ms exceeds ±1s", diff);
        }
    }
}
