// HTTP/WebSocket Server - axum router over the hub and the store
// /ws streams the broadcast fabric; /api/* queries the persistent store

pub mod api;
pub mod ws;

use axum::routing::get;
use axum::Router;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::core::clock::Clock;
use crate::core::types::RunMode;
use crate::hub::BroadcastHub;
use crate::store::SignalStore;

/// Shared read-side state for subscribers and API handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub store: SignalStore,
    pub clock: Clock,
    pub min_size: Arc<AtomicU32>,
    pub symbols: Vec<String>,
    pub mode: RunMode,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/signals", get(api::get_signals))
        .route("/api/signals/export", get(api::export_signals))
        .route("/api/sessions", get(api::get_sessions))
        .route("/api/stats", get(api::get_stats))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_builds() {
        let state = AppState {
            hub: BroadcastHub::new(16),
            store: SignalStore::open(":memory:", 16).unwrap(),
            clock: Clock::Wall,
            min_size: Arc::new(AtomicU32::new(1)),
            symbols: vec!["NQ.c.0".to_string()],
            mode: RunMode::Demo,
        };
        let _router = build_router(state);
    }
}
