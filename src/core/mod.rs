// Core layer: shared types, configuration, errors, logging, time

pub mod clock;
pub mod config;
pub mod error;
pub mod logger;
pub mod types;

pub use clock::{wall_now_ms, Clock, ReplayClock, ReplayState};
pub use config::{DetectorThresholds, EngineConfig, GatewayConfig, HubConfig, StoreConfig};
pub use error::{ConfigError, SourceError, StoreError};
pub use logger::setup_logging;
pub use types::{
    Aggregate, Aggressor, Direction, PriceLevel, RunMode, Signal, SignalKind, SignalOutcome, Trade,
};
