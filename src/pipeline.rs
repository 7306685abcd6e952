// Ingest Pipeline - source → buckets → detectors → hub / store / outcomes
// One task owns every piece of mutable market state; the rest of the system
// sees broadcast messages and store rows

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::core::clock::Clock;
use crate::core::config::EngineConfig;
use crate::core::error::SourceError;
use crate::core::types::{Direction, Signal, SignalKind, Trade};
use crate::detect::{BucketAggregator, ClosedBucket, DetectorStack};
use crate::hub::{BroadcastHub, WsMessage};
use crate::outcome::{OutcomeTracker, OutcomeUpdate};
use crate::session::SessionTracker;
use crate::store::{SignalRow, SignalStore, WriteOp};
use crate::stream::TradeSource;

/// Counters reported when the pipeline stops.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub trades_processed: u64,
    pub trades_filtered: u64,
    pub aggregates_emitted: u64,
    pub signals_emitted: u64,
    pub source_malformed: u64,
}

struct SymbolState {
    buckets: BucketAggregator,
    detectors: DetectorStack,
}

pub struct Pipeline<S: TradeSource> {
    source: S,
    hub: BroadcastHub,
    store: SignalStore,
    session: SessionTracker,
    outcome: OutcomeTracker,
    clock: Clock,
    config: EngineConfig,
    min_size: Arc<AtomicU32>,
    symbols: HashMap<String, SymbolState>,
    last_price: f64,
    last_snapshot_sec: u64,
    stats: PipelineStats,
}

impl<S: TradeSource> Pipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        hub: BroadcastHub,
        store: SignalStore,
        session: SessionTracker,
        clock: Clock,
        config: EngineConfig,
        min_size: Arc<AtomicU32>,
    ) -> Self {
        // one symbol's tick sets the outcome threshold scale; configs with
        // mixed tick sizes should pin outcome_win_ticks accordingly
        let reference_tick = session
            .symbols()
            .first()
            .map(|s| config.tick_for(s))
            .unwrap_or(config.default_tick);
        let outcome = OutcomeTracker::new(config.thresholds.outcome_win_ticks, reference_tick);

        Self {
            source,
            hub,
            store,
            session,
            outcome,
            clock,
            config,
            min_size,
            symbols: HashMap::new(),
            last_price: 0.0,
            last_snapshot_sec: 0,
            stats: PipelineStats::default(),
        }
    }

    /// Run until the source ends, shutdown is signalled, or a fatal source
    /// error occurs. In all cases the open buckets are flushed once and the
    /// session is finalized; pending outcomes stay pending.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineStats, SourceError> {
        self.open_session();

        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        enum Step {
            Trade(Result<Option<Trade>, SourceError>),
            Tick,
            Shutdown,
        }

        let result = loop {
            let step = tokio::select! {
                result = self.source.next() => Step::Trade(result),
                _ = ticker.tick() => Step::Tick,
                _ = shutdown.changed() => Step::Shutdown,
            };
            match step {
                Step::Trade(Ok(Some(trade))) => self.on_trade(trade),
                Step::Trade(Ok(None)) => {
                    info!("trade source exhausted");
                    break Ok(());
                }
                Step::Trade(Err(error)) if error.is_fatal() => {
                    warn!(%error, "fatal source error, shutting pipeline down");
                    self.hub.publish(WsMessage::error(error.to_string()));
                    break Err(error);
                }
                Step::Trade(Err(error)) => {
                    warn!(%error, "transient source error");
                    self.hub.publish(WsMessage::error(error.to_string()));
                }
                Step::Tick => self.on_tick(),
                Step::Shutdown => {
                    info!("pipeline shutdown requested");
                    break Ok(());
                }
            }
        };

        let stats = self.finish();
        result.map(|_| stats)
    }

    fn open_session(&mut self) {
        self.store.enqueue(WriteOp::InsertSession(crate::store::SessionRow {
            id: self.session.id(),
            started_at: self.session.started_at() as i64,
            ended_at: None,
            mode: self.session.mode().as_str().to_string(),
            symbols: self.session.symbols().to_vec(),
            session_high: None,
            session_low: None,
            total_volume: None,
        }));
        self.hub.publish(WsMessage::connected(
            self.session.symbols(),
            self.session.mode().as_str(),
        ));
        info!(
            session = %self.session.id(),
            mode = %self.session.mode(),
            "session opened"
        );
    }

    fn ensure_state(&mut self, symbol: &str) {
        if !self.symbols.contains_key(symbol) {
            self.symbols.insert(
                symbol.to_string(),
                SymbolState {
                    buckets: BucketAggregator::new(
                        self.config.thresholds.significant_imbalance_ratio,
                    ),
                    detectors: DetectorStack::new(
                        symbol,
                        self.config.tick_for(symbol),
                        &self.config.thresholds,
                    ),
                },
            );
        }
    }

    fn on_trade(&mut self, trade: Trade) {
        self.stats.trades_processed += 1;
        if trade.size < self.min_size.load(Ordering::Relaxed) {
            self.stats.trades_filtered += 1;
            return;
        }

        self.session.on_trade(trade.price, trade.size);
        self.last_price = trade.price;

        self.ensure_state(&trade.symbol);
        let closed = self
            .symbols
            .get_mut(&trade.symbol)
            .expect("state created above")
            .buckets
            .add_trade(&trade);
        if let Some(closed) = closed {
            self.handle_closed(&trade.symbol, closed);
        }
        self.symbols
            .get_mut(&trade.symbol)
            .expect("state created above")
            .detectors
            .add_trade(&trade);
    }

    /// A bucket closed: run every detector, broadcast, persist, and feed the
    /// outcome evaluator. `now` is the bucket's close instant on the data
    /// timeline so replay output does not depend on playback pacing.
    fn handle_closed(&mut self, symbol: &str, closed: ClosedBucket) {
        let now = closed.aggregate.bucket_start + 1000;
        let bucket_last_price = closed
            .trades
            .last()
            .map(|t| t.price)
            .unwrap_or(self.last_price);

        let output = self
            .symbols
            .get_mut(symbol)
            .expect("caller owns a state")
            .detectors
            .on_bucket_close(&closed, now);

        self.stats.aggregates_emitted += 1;
        self.hub.publish(WsMessage::bubble(&closed.aggregate));
        self.hub.publish(WsMessage::cvd_point(&output.cvd_point));

        if self.config.store.record_price_samples {
            self.store.enqueue(WriteOp::InsertPriceSample {
                session_id: self.session.id(),
                timestamp: now as i64,
                price: closed.aggregate.vwap,
                cvd: output.cvd_point.value,
            });
        }

        if let Some(flip) = &output.delta_flip {
            self.hub.publish(WsMessage::delta_flip(flip));
            self.emit_signal(SignalKind::DeltaFlip, flip.direction, closed.aggregate.vwap, now);
        }
        for event in &output.absorption {
            self.hub.publish(WsMessage::absorption(event));
            self.emit_signal(SignalKind::Absorption, event.kind.direction(), event.price, now);
        }
        if let Some(event) = &output.stacked {
            self.hub.publish(WsMessage::stacked_imbalance(event));
            let mid = (event.price_low + event.price_high) / 2.0;
            self.emit_signal(SignalKind::StackedImbalance, event.direction, mid, now);
        }
        if let Some(event) = &output.confluence {
            self.hub.publish(WsMessage::confluence(event));
            self.emit_signal(SignalKind::Confluence, event.direction, event.price, now);
        }

        let updates = self.outcome.on_tick(now, bucket_last_price);
        self.apply_outcome_updates(updates);
    }

    fn emit_signal(&mut self, kind: SignalKind, direction: Direction, price: f64, now: u64) {
        let signal = Signal::new(self.session.id(), now, kind, direction, price);
        self.outcome
            .register(signal.id, kind, direction, price, now);
        self.session.on_signal(kind, direction);
        self.stats.signals_emitted += 1;
        self.store.enqueue(WriteOp::InsertSignal(SignalRow::from_signal(
            &signal,
            chrono::Utc::now().to_rfc3339(),
        )));
        info!(
            kind = %kind,
            direction = %direction,
            price,
            "signal emitted"
        );
    }

    fn apply_outcome_updates(&mut self, updates: Vec<OutcomeUpdate>) {
        for update in updates {
            if let Some(price_1m) = update.price_after_1m {
                self.session
                    .on_mark_filled(update.kind, price_1m - update.price_at_emit, false);
            }
            if let Some(price_5m) = update.price_after_5m {
                self.session
                    .on_mark_filled(update.kind, price_5m - update.price_at_emit, true);
            }
            if let Some(outcome) = update.outcome {
                self.session.on_outcome(update.kind, outcome);
            }
            self.store.enqueue(WriteOp::UpdateOutcome(update));
        }
    }

    /// Periodic work: idle/elapsed bucket closes, once-per-second snapshots,
    /// replay status, outcome marks during quiet stretches.
    fn on_tick(&mut self) {
        let now = self.clock.now_ms();

        let keys: Vec<String> = self.symbols.keys().cloned().collect();
        for symbol in &keys {
            let closed = {
                let state = self.symbols.get_mut(symbol).expect("known symbol");
                if self.clock.is_replay() {
                    state.buckets.close_if_elapsed(now)
                } else {
                    state
                        .buckets
                        .close_if_idle(self.config.thresholds.bucket_idle_close_secs)
                }
            };
            if let Some(closed) = closed {
                self.handle_closed(symbol, closed);
            }
        }

        let second = now / 1000;
        if second == self.last_snapshot_sec {
            return;
        }
        self.last_snapshot_sec = second;

        for (symbol, state) in self.symbols.iter_mut() {
            state.detectors.prune(now);
            let snapshot = state.detectors.profile_snapshot();
            self.hub.publish(WsMessage::volume_profile(symbol, &snapshot));
            let zones = state.detectors.zones_snapshot();
            self.hub.publish(WsMessage::absorption_zones(symbol, &zones));
        }

        self.hub
            .publish(WsMessage::session_stats(self.session.stats_msg()));

        if let Some(replay) = self.clock.replay() {
            self.hub.publish(WsMessage::replay_status(&replay.state()));
        }

        if self.last_price > 0.0 {
            let updates = self.outcome.on_tick(now, self.last_price);
            self.apply_outcome_updates(updates);
        }
    }

    /// Drain open buckets once, publish final stats, finalize the session
    /// row. Pending outcome marks are abandoned, leaving their signals
    /// pending in the store.
    fn finish(&mut self) -> PipelineStats {
        let keys: Vec<String> = self.symbols.keys().cloned().collect();
        for symbol in &keys {
            let closed = self
                .symbols
                .get_mut(symbol)
                .expect("known symbol")
                .buckets
                .flush();
            if let Some(closed) = closed {
                self.handle_closed(symbol, closed);
            }
        }

        self.hub
            .publish(WsMessage::session_stats(self.session.stats_msg()));

        self.session.close();
        self.store.enqueue(WriteOp::CloseSession {
            id: self.session.id(),
            ended_at: self.clock.now_ms() as i64,
            session_high: self.session.session_high(),
            session_low: self.session.session_low(),
            total_volume: self.session.total_volume() as i64,
        });

        self.stats.source_malformed = self.source.malformed_count();
        info!(
            trades = self.stats.trades_processed,
            filtered = self.stats.trades_filtered,
            aggregates = self.stats.aggregates_emitted,
            signals = self.stats.signals_emitted,
            malformed = self.stats.source_malformed,
            pending_outcomes = self.outcome.pending_count(),
            "pipeline stopped"
        );
        self.stats.clone()
    }
}
