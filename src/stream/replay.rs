// Replay Source - recorded trades released against the virtual clock
// Each trade waits until virtual time reaches its timestamp; pause freezes
// the stream and large recording gaps are jumped instead of slept through

use async_trait::async_trait;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::clock::ReplayClock;
use crate::core::error::SourceError;
use crate::core::types::Trade;
use crate::stream::TradeSource;

/// Real seconds we are willing to sleep toward the next trade before jumping
/// the clock over the gap.
const MAX_GAP_WAIT_SECS: f64 = 5.0;

pub struct ReplaySource {
    trades: Vec<Trade>,
    cursor: usize,
    clock: ReplayClock,
    malformed: u64,
}

impl ReplaySource {
    pub fn new(mut trades: Vec<Trade>, clock: ReplayClock) -> Self {
        trades.sort_by_key(|t| t.timestamp);
        Self {
            trades,
            cursor: 0,
            clock,
            malformed: 0,
        }
    }

    /// Load a JSON-lines recording. Unparseable lines are counted and
    /// skipped; they never abort the replay.
    pub fn load(path: &Path) -> Result<(Vec<Trade>, u64), SourceError> {
        let file = File::open(path)
            .map_err(|e| SourceError::Fatal(format!("cannot open recording {:?}: {}", path, e)))?;
        let reader = BufReader::new(file);

        let mut trades = Vec::new();
        let mut malformed = 0u64;
        for line in reader.lines() {
            let line =
                line.map_err(|e| SourceError::Fatal(format!("cannot read recording: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Trade>(&line) {
                Ok(trade) => trades.push(trade),
                Err(error) => {
                    malformed += 1;
                    debug!(%error, "skipping malformed recording line");
                }
            }
        }
        trades.sort_by_key(|t| t.timestamp);
        info!(count = trades.len(), malformed, path = ?path, "recording loaded");
        Ok((trades, malformed))
    }

    pub fn from_file(path: &Path, clock: ReplayClock) -> Result<Self, SourceError> {
        let (trades, malformed) = Self::load(path)?;
        if trades.is_empty() {
            return Err(SourceError::Fatal(format!(
                "recording {:?} contains no trades",
                path
            )));
        }
        Ok(Self {
            trades,
            cursor: 0,
            clock,
            malformed,
        })
    }

    pub fn first_timestamp(&self) -> Option<u64> {
        self.trades.first().map(|t| t.timestamp)
    }

    pub fn remaining(&self) -> usize {
        self.trades.len() - self.cursor
    }
}

#[async_trait]
impl TradeSource for ReplaySource {
    async fn next(&mut self) -> Result<Option<Trade>, SourceError> {
        let Some(trade) = self.trades.get(self.cursor).cloned() else {
            return Ok(None);
        };

        loop {
            let state = self.clock.state();
            if state.paused {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            let now = state.virtual_ms;
            if now >= trade.timestamp {
                break;
            }
            let virtual_gap = (trade.timestamp - now) as f64;
            let real_wait_secs = virtual_gap / 1000.0 / state.speed;
            if real_wait_secs > MAX_GAP_WAIT_SECS {
                debug!(gap_ms = virtual_gap as u64, "jumping recording gap");
                self.clock.jump_to(trade.timestamp);
                break;
            }
            // short naps so pause and speed changes take effect promptly
            let nap = Duration::from_secs_f64(real_wait_secs.min(0.05)).max(Duration::from_millis(1));
            tokio::time::sleep(nap).await;
        }

        self.cursor += 1;
        Ok(Some(trade))
    }

    fn malformed_count(&self) -> u64 {
        self.malformed
    }
}
