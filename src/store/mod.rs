// Signal Store - embedded SQLite persistence for signals and sessions
// Single writer thread drains a bounded queue; the pipeline never blocks on
// the database, it drops the oldest pending writes instead

pub mod export;

use parking_lot::{Condvar, Mutex};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::error::StoreError;
use crate::core::types::Signal;
use crate::outcome::OutcomeUpdate;

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub created_at: String,
    pub timestamp: i64,
    pub signal_type: String,
    pub direction: String,
    pub price: f64,
    pub price_after_1m: Option<f64>,
    pub price_after_5m: Option<f64>,
    pub outcome: String,
}

impl SignalRow {
    pub fn from_signal(signal: &Signal, created_at: String) -> Self {
        Self {
            id: signal.id,
            session_id: signal.session_id,
            created_at,
            timestamp: signal.timestamp as i64,
            signal_type: signal.kind.as_str().to_string(),
            direction: signal.direction.as_str().to_string(),
            price: signal.price,
            price_after_1m: signal.price_after_1m,
            price_after_5m: signal.price_after_5m,
            outcome: signal.outcome.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: Uuid,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub mode: String,
    pub symbols: Vec<String>,
    pub session_high: Option<f64>,
    pub session_low: Option<f64>,
    pub total_volume: Option<i64>,
}

/// Filters for the query/export surface. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub signal_type: Option<String>,
    pub direction: Option<String>,
    pub outcome: Option<String>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Per-kind aggregate statistics computed in SQL.
#[derive(Debug, Clone, Serialize)]
pub struct KindStatsRow {
    pub signal_type: String,
    pub count: u32,
    pub bullish: u32,
    pub bearish: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakevens: u32,
    pub pending: u32,
    pub avg_move_1m: f64,
    pub avg_move_5m: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub total_signals: u32,
    pub by_type: Vec<KindStatsRow>,
}

// ============================================================================
// Write queue
// ============================================================================

#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertSignal(SignalRow),
    UpdateOutcome(OutcomeUpdate),
    InsertSession(SessionRow),
    CloseSession {
        id: Uuid,
        ended_at: i64,
        session_high: f64,
        session_low: f64,
        total_volume: i64,
    },
    InsertPriceSample {
        session_id: Uuid,
        timestamp: i64,
        price: f64,
        cvd: i64,
    },
}

struct QueueInner {
    ops: VecDeque<WriteOp>,
    busy: bool,
    shutdown: bool,
}

struct WriteQueue {
    inner: Mutex<QueueInner>,
    signal: Condvar,
    backlog: usize,
    dropped: AtomicU64,
    write_errors: AtomicU64,
}

impl WriteQueue {
    fn new(backlog: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                ops: VecDeque::new(),
                busy: false,
                shutdown: false,
            }),
            signal: Condvar::new(),
            backlog: backlog.max(1),
            dropped: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, op: WriteOp) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return;
        }
        if inner.ops.len() >= self.backlog {
            inner.ops.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        inner.ops.push_back(op);
        self.signal.notify_all();
    }
}

// ============================================================================
// Store
// ============================================================================

/// Handle to the embedded store. Clones share the connection and queue.
#[derive(Clone)]
pub struct SignalStore {
    conn: Arc<Mutex<Connection>>,
    queue: Arc<WriteQueue>,
    writer: Arc<Mutex<Option<std::thread::JoinHandle<()>>>>,
}

impl SignalStore {
    pub fn open(path: &str, backlog: usize) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)?
        };
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: Arc::new(WriteQueue::new(backlog)),
            writer: Arc::new(Mutex::new(None)),
        };
        store.spawn_writer();
        info!(path, "Signal store opened");
        Ok(store)
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                started_at    INTEGER NOT NULL,
                ended_at      INTEGER,
                mode          TEXT NOT NULL,
                symbols       TEXT NOT NULL,
                session_high  REAL,
                session_low   REAL,
                total_volume  INTEGER
            );
            CREATE TABLE IF NOT EXISTS signals (
                id             TEXT PRIMARY KEY,
                session_id     TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                timestamp      INTEGER NOT NULL,
                signal_type    TEXT NOT NULL,
                direction      TEXT NOT NULL,
                price          REAL NOT NULL,
                price_after_1m REAL,
                price_after_5m REAL,
                outcome        TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON signals(timestamp);
            CREATE INDEX IF NOT EXISTS idx_signals_type ON signals(signal_type);
            CREATE TABLE IF NOT EXISTS price_samples (
                session_id TEXT NOT NULL,
                timestamp  INTEGER NOT NULL,
                price      REAL NOT NULL,
                cvd        INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn spawn_writer(&self) {
        let conn = Arc::clone(&self.conn);
        let queue = Arc::clone(&self.queue);
        let handle = std::thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || loop {
                let batch: Vec<WriteOp> = {
                    let mut inner = queue.inner.lock();
                    while inner.ops.is_empty() && !inner.shutdown {
                        queue.signal.wait(&mut inner);
                    }
                    if inner.ops.is_empty() && inner.shutdown {
                        return;
                    }
                    inner.busy = true;
                    inner.ops.drain(..).collect()
                };

                {
                    let conn = conn.lock();
                    for op in batch {
                        // one retry per op; a persistent failure is counted
                        // and the pipeline carries on
                        if let Err(first) = Self::execute(&conn, &op) {
                            warn!(error = %first, "store write failed, retrying");
                            if let Err(second) = Self::execute(&conn, &op) {
                                error!(error = %second, "store write dropped after retry");
                                queue.write_errors.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }

                let mut inner = queue.inner.lock();
                inner.busy = false;
                queue.signal.notify_all();
            })
            .expect("failed to spawn store writer thread");
        *self.writer.lock() = Some(handle);
    }

    fn execute(conn: &Connection, op: &WriteOp) -> Result<(), rusqlite::Error> {
        match op {
            WriteOp::InsertSignal(row) => {
                conn.execute(
                    "INSERT OR REPLACE INTO signals
                     (id, session_id, created_at, timestamp, signal_type, direction,
                      price, price_after_1m, price_after_5m, outcome)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        row.id.to_string(),
                        row.session_id.to_string(),
                        row.created_at,
                        row.timestamp,
                        row.signal_type,
                        row.direction,
                        row.price,
                        row.price_after_1m,
                        row.price_after_5m,
                        row.outcome,
                    ],
                )?;
            }
            WriteOp::UpdateOutcome(update) => {
                // outcome fields are the only in-place mutation in the schema
                conn.execute(
                    "UPDATE signals SET
                        price_after_1m = COALESCE(?2, price_after_1m),
                        price_after_5m = COALESCE(?3, price_after_5m),
                        outcome        = COALESCE(?4, outcome)
                     WHERE id = ?1",
                    params![
                        update.id.to_string(),
                        update.price_after_1m,
                        update.price_after_5m,
                        update.outcome.map(|o| o.as_str().to_string()),
                    ],
                )?;
            }
            WriteOp::InsertSession(row) => {
                conn.execute(
                    "INSERT OR REPLACE INTO sessions
                     (id, started_at, ended_at, mode, symbols, session_high,
                      session_low, total_volume)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        row.id.to_string(),
                        row.started_at,
                        row.ended_at,
                        row.mode,
                        row.symbols.join(","),
                        row.session_high,
                        row.session_low,
                        row.total_volume,
                    ],
                )?;
            }
            WriteOp::CloseSession {
                id,
                ended_at,
                session_high,
                session_low,
                total_volume,
            } => {
                conn.execute(
                    "UPDATE sessions SET ended_at = ?2, session_high = ?3,
                        session_low = ?4, total_volume = ?5
                     WHERE id = ?1",
                    params![id.to_string(), ended_at, session_high, session_low, total_volume],
                )?;
            }
            WriteOp::InsertPriceSample {
                session_id,
                timestamp,
                price,
                cvd,
            } => {
                conn.execute(
                    "INSERT INTO price_samples (session_id, timestamp, price, cvd)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![session_id.to_string(), timestamp, price, cvd],
                )?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write surface (non-blocking)
    // ------------------------------------------------------------------

    pub fn enqueue(&self, op: WriteOp) {
        self.queue.enqueue(op);
    }

    /// Writes shed to backpressure so far.
    pub fn dropped_writes(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.queue.write_errors.load(Ordering::Relaxed)
    }

    /// Block until every enqueued write has been executed.
    pub fn flush(&self) {
        let mut inner = self.queue.inner.lock();
        while !inner.ops.is_empty() || inner.busy {
            self.queue.signal.wait(&mut inner);
        }
    }

    /// Drain outstanding writes and stop the writer thread.
    pub fn shutdown(&self) {
        {
            let mut inner = self.queue.inner.lock();
            inner.shutdown = true;
            self.queue.signal.notify_all();
        }
        self.flush();
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
    }

    // ------------------------------------------------------------------
    // Query surface (blocking; call from spawn_blocking in async contexts)
    // ------------------------------------------------------------------

    fn filter_clause(filter: &SignalFilter) -> (String, Vec<rusqlite::types::Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(kind) = &filter.signal_type {
            clauses.push("signal_type = ?");
            values.push(kind.clone().into());
        }
        if let Some(direction) = &filter.direction {
            clauses.push("direction = ?");
            values.push(direction.clone().into());
        }
        if let Some(outcome) = &filter.outcome {
            clauses.push("outcome = ?");
            values.push(outcome.clone().into());
        }
        if let Some(start) = filter.start_ms {
            clauses.push("timestamp >= ?");
            values.push(start.into());
        }
        if let Some(end) = filter.end_ms {
            clauses.push("timestamp <= ?");
            values.push(end.into());
        }

        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (clause, values)
    }

    pub fn query_signals(&self, filter: &SignalFilter) -> Result<Vec<SignalRow>, StoreError> {
        let (clause, mut values) = Self::filter_clause(filter);
        let limit = filter.limit.unwrap_or(100).min(10_000);
        let offset = filter.offset.unwrap_or(0);
        let sql = format!(
            "SELECT id, session_id, created_at, timestamp, signal_type, direction,
                    price, price_after_1m, price_after_5m, outcome
             FROM signals{clause}
             ORDER BY timestamp DESC LIMIT ? OFFSET ?"
        );
        values.push((limit as i64).into());
        values.push((offset as i64).into());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_signal_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_signal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalRow> {
        let id: String = row.get(0)?;
        let session_id: String = row.get(1)?;
        Ok(SignalRow {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
            created_at: row.get(2)?,
            timestamp: row.get(3)?,
            signal_type: row.get(4)?,
            direction: row.get(5)?,
            price: row.get(6)?,
            price_after_1m: row.get(7)?,
            price_after_5m: row.get(8)?,
            outcome: row.get(9)?,
        })
    }

    pub fn count_signals(&self, filter: &SignalFilter) -> Result<u64, StoreError> {
        let (clause, values) = Self::filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM signals{clause}");
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn query_sessions(&self, limit: u32) -> Result<Vec<SessionRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, ended_at, mode, symbols, session_high,
                    session_low, total_volume
             FROM sessions ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let id: String = row.get(0)?;
                let symbols: String = row.get(4)?;
                Ok(SessionRow {
                    id: Uuid::parse_str(&id).unwrap_or_default(),
                    started_at: row.get(1)?,
                    ended_at: row.get(2)?,
                    mode: row.get(3)?,
                    symbols: if symbols.is_empty() {
                        Vec::new()
                    } else {
                        symbols.split(',').map(str::to_string).collect()
                    },
                    session_high: row.get(5)?,
                    session_low: row.get(6)?,
                    total_volume: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn aggregate_stats(&self) -> Result<StatsReport, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT signal_type,
                    COUNT(*),
                    SUM(direction = 'bullish'),
                    SUM(direction = 'bearish'),
                    SUM(outcome = 'win'),
                    SUM(outcome = 'loss'),
                    SUM(outcome = 'breakeven'),
                    SUM(outcome = 'pending'),
                    AVG(price_after_1m - price),
                    AVG(price_after_5m - price)
             FROM signals GROUP BY signal_type ORDER BY signal_type",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let wins: u32 = row.get::<_, Option<u32>>(4)?.unwrap_or(0);
                let losses: u32 = row.get::<_, Option<u32>>(5)?.unwrap_or(0);
                let completed = wins + losses;
                Ok(KindStatsRow {
                    signal_type: row.get(0)?,
                    count: row.get(1)?,
                    bullish: row.get::<_, Option<u32>>(2)?.unwrap_or(0),
                    bearish: row.get::<_, Option<u32>>(3)?.unwrap_or(0),
                    wins,
                    losses,
                    breakevens: row.get::<_, Option<u32>>(6)?.unwrap_or(0),
                    pending: row.get::<_, Option<u32>>(7)?.unwrap_or(0),
                    avg_move_1m: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
                    avg_move_5m: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
                    win_rate: if completed > 0 {
                        wins as f64 / completed as f64 * 100.0
                    } else {
                        0.0
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StatsReport {
            total_signals: rows.iter().map(|r| r.count).sum(),
            by_type: rows,
        })
    }

    pub fn get_signal(&self, id: Uuid) -> Result<Option<SignalRow>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, session_id, created_at, timestamp, signal_type, direction,
                        price, price_after_1m, price_after_5m, outcome
                 FROM signals WHERE id = ?1",
                params![id.to_string()],
                Self::map_signal_row,
            )
            .optional()?;
        Ok(row)
    }
}
