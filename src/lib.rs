// Flowscope - real-time futures order-flow signal engine
//
// Layering:
// - core: shared types, config, errors, logging, the wall/virtual clock
// - stream: trade sources (live gateway, demo generator, replay)
// - detect: per-symbol state machines fed by 1-second buckets
// - pipeline: the ingest task wiring sources to detectors and sinks
// - hub: typed broadcast fan-out to WebSocket subscribers
// - outcome / session: signal grading and per-session statistics
// - store: embedded SQLite persistence with a single-writer queue
// - server: axum router for /ws and the query/export API

pub mod core;
pub mod detect;
pub mod hub;
pub mod outcome;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod store;
pub mod stream;
