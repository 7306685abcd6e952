// Flowscope server binary
// Wires a trade source, the ingest pipeline, the broadcast hub, the SQLite
// store and the axum server together according to the CLI mode

use clap::Parser;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use flowscope::core::clock::{Clock, ReplayClock};
use flowscope::core::config::EngineConfig;
use flowscope::core::error::SourceError;
use flowscope::core::logger::setup_logging;
use flowscope::core::types::RunMode;
use flowscope::hub::BroadcastHub;
use flowscope::pipeline::Pipeline;
use flowscope::server::{build_router, AppState};
use flowscope::session::SessionTracker;
use flowscope::store::SignalStore;
use flowscope::stream::{DemoSource, LiveSource, ReplaySource};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run in demo mode with simulated trades
    #[arg(short, long, default_value = "false")]
    demo: bool,

    /// Replay a recorded JSON-lines trade file instead of connecting live
    #[arg(long)]
    replay: Option<String>,

    /// Replay speed multiplier (1 = real time)
    #[arg(long, default_value = "1.0")]
    replay_speed: f64,

    /// Trade gateway API key (not required for demo/replay)
    #[arg(short, long, env = "DATABENTO_API_KEY")]
    api_key: Option<String>,

    /// Normalized trade gateway WebSocket URL (live mode)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Symbols to subscribe to (comma-separated)
    #[arg(short = 's', long, default_value = "NQ.c.0,ES.c.0")]
    symbols: String,

    /// Port to run the web server on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Minimum trade size to process
    #[arg(short = 'f', long, default_value = "1")]
    min_size: u32,

    /// SQLite database path
    #[arg(long, default_value = "flowscope.db")]
    db: String,

    /// Optional JSON config file with detector thresholds
    #[arg(short, long)]
    config: Option<String>,
}

enum RunError {
    Config(String),
    Source(SourceError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Config(message) => write!(f, "config error: {}", message),
            RunError::Source(error) => write!(f, "{}", error),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging(None, false);
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(message)) => {
            error!(%message, "invalid configuration");
            ExitCode::from(1)
        }
        Err(RunError::Source(source_error)) => {
            error!(error = %source_error, "fatal source error");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<(), RunError> {
    let mut config = EngineConfig::load(args.config.as_deref())
        .map_err(|e| RunError::Config(e.to_string()))?;
    if let Some(api_key) = &args.api_key {
        config.gateway.api_key = api_key.clone();
    }
    if let Some(url) = &args.gateway_url {
        config.gateway.ws_url = url.clone();
    }
    config.store.db_path = args.db.clone();

    let symbols: Vec<String> = args
        .symbols
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(RunError::Config("no symbols given".to_string()));
    }

    let mode = if args.replay.is_some() {
        RunMode::Replay
    } else if args.demo {
        RunMode::Demo
    } else {
        RunMode::Live
    };
    info!(%mode, symbols = %args.symbols, port = args.port, min_size = args.min_size, "starting flowscope");

    let store = SignalStore::open(&config.store.db_path, config.store.write_backlog)
        .map_err(|e| RunError::Config(format!("cannot open store: {}", e)))?;
    let hub = BroadcastHub::new(config.hub.subscriber_capacity);
    let min_size = Arc::new(AtomicU32::new(args.min_size.max(1)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // one spawn per source type; everything downstream is shared
    let (clock, mut pipeline_task) = match (&args.replay, args.demo) {
        (Some(path), _) => build_replay(
            path,
            args.replay_speed,
            &config,
            &symbols,
            &hub,
            &store,
            &min_size,
            shutdown_rx,
        )?,
        (None, true) => {
            let source = DemoSource::new(&symbols[0], config.tick_for(&symbols[0]));
            let clock = Clock::Wall;
            let session = SessionTracker::open(mode, symbols.clone(), clock.now_ms());
            let pipeline = Pipeline::new(
                source,
                hub.clone(),
                store.clone(),
                session,
                clock.clone(),
                config.clone(),
                Arc::clone(&min_size),
            );
            (clock, tokio::spawn(pipeline.run(shutdown_rx)))
        }
        (None, false) => {
            if config.gateway.ws_url.is_empty() {
                return Err(RunError::Config(
                    "live mode requires --gateway-url (or --demo / --replay)".to_string(),
                ));
            }
            if config.gateway.api_key.is_empty() {
                return Err(RunError::Config(
                    "live mode requires --api-key or DATABENTO_API_KEY".to_string(),
                ));
            }
            let source = LiveSource::new(config.gateway.clone(), symbols.clone());
            let clock = Clock::Wall;
            let session = SessionTracker::open(mode, symbols.clone(), clock.now_ms());
            let pipeline = Pipeline::new(
                source,
                hub.clone(),
                store.clone(),
                session,
                clock.clone(),
                config.clone(),
                Arc::clone(&min_size),
            );
            (clock, tokio::spawn(pipeline.run(shutdown_rx)))
        }
    };

    // HTTP + WebSocket server
    let state = AppState {
        hub: hub.clone(),
        store: store.clone(),
        clock: clock.clone(),
        min_size: Arc::clone(&min_size),
        symbols: symbols.clone(),
        mode,
    };
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RunError::Config(format!("cannot bind {}: {}", addr, e)))?;
    info!("server running at http://{}", addr);
    info!("websocket endpoint: ws://localhost:{}/ws", args.port);

    let mut server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    // wait for the pipeline to end on its own or for Ctrl+C
    let pipeline_result = tokio::select! {
        result = &mut pipeline_task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, finalizing session");
            let _ = shutdown_tx.send(true);
            (&mut pipeline_task).await
        }
    };
    let _ = shutdown_tx.send(true);
    let _ = server_task.await;

    // drain outstanding writes before reporting
    store.shutdown();

    match pipeline_result {
        Ok(Ok(stats)) => {
            info!(
                trades = stats.trades_processed,
                signals = stats.signals_emitted,
                dropped_writes = store.dropped_writes(),
                "flowscope stopped"
            );
            Ok(())
        }
        Ok(Err(source_error)) => Err(RunError::Source(source_error)),
        Err(join_error) => Err(RunError::Config(format!("pipeline panicked: {}", join_error))),
    }
}

type PipelineTask =
    tokio::task::JoinHandle<Result<flowscope::pipeline::PipelineStats, SourceError>>;

/// Load the recording, anchor the virtual clock at its first trade, and
/// spawn the pipeline.
#[allow(clippy::too_many_arguments)]
fn build_replay(
    path: &str,
    speed: f64,
    config: &EngineConfig,
    symbols: &[String],
    hub: &BroadcastHub,
    store: &SignalStore,
    min_size: &Arc<AtomicU32>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(Clock, PipelineTask), RunError> {
    let (trades, malformed) = ReplaySource::load(Path::new(path))
        .map_err(|e| RunError::Config(format!("cannot load recording: {}", e)))?;
    let Some(first) = trades.first() else {
        return Err(RunError::Config(format!("recording {} is empty", path)));
    };
    if malformed > 0 {
        info!(malformed, "recording had unparseable lines");
    }

    let replay_clock = ReplayClock::new(first.timestamp, speed);
    let clock = Clock::Replay(replay_clock.clone());
    let source = ReplaySource::new(trades, replay_clock);
    let session = SessionTracker::open(RunMode::Replay, symbols.to_vec(), clock.now_ms());
    let pipeline = Pipeline::new(
        source,
        hub.clone(),
        store.clone(),
        session,
        clock.clone(),
        config.clone(),
        Arc::clone(min_size),
    );
    Ok((clock, tokio::spawn(pipeline.run(shutdown_rx))))
}
