// Confluence Engine - distinct signal kinds agreeing inside a sliding window
// Tags live in a time-ordered ring; each tag backs at most one confluence

use crate::core::types::{Direction, SignalKind};
use crate::detect::window::TimeWindow;

#[derive(Debug, Clone)]
pub struct ConfluenceEvent {
    pub timestamp: u64,
    pub price: f64,
    pub direction: Direction,
    /// Number of distinct signal kinds agreeing.
    pub score: u8,
    /// Tags of the contributing kinds, e.g. "absorption".
    pub signals: Vec<String>,
}

#[derive(Debug, Clone)]
struct Tag {
    kind: SignalKind,
    direction: Direction,
    consumed: bool,
}

/// Base signals (never confluences themselves) are tagged into the window as
/// they fire; agreement is evaluated once per closed bucket so every signal
/// born in that bucket can contribute to the same confluence. A tag backs at
/// most one confluence, so the next one needs fresh evidence.
pub struct ConfluenceEngine {
    window: TimeWindow<Tag>,
    window_ms: u64,
    events_emitted: u64,
}

impl ConfluenceEngine {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: TimeWindow::new(window_ms, 1024),
            window_ms,
            events_emitted: 0,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    /// Record a freshly emitted base signal.
    pub fn record_tag(&mut self, kind: SignalKind, direction: Direction, now: u64) {
        self.window.add(
            now,
            Tag {
                kind,
                direction,
                consumed: false,
            },
        );
    }

    /// Check the window for agreement. `price` is the reference price for the
    /// emitted event (the closing bucket's vwap).
    pub fn evaluate(&mut self, price: f64, now: u64) -> Option<ConfluenceEvent> {
        self.window.prune(now);

        // most recent unconsumed tag per kind, newest last
        let mut latest: Vec<(SignalKind, Direction)> = Vec::new();
        for (_, tag) in self.window.iter() {
            if tag.consumed {
                continue;
            }
            latest.retain(|(k, _)| *k != tag.kind);
            latest.push((tag.kind, tag.direction));
        }
        if latest.len() < 2 {
            return None;
        }

        // majority direction; ties resolve to the most recent tag
        let bullish = latest
            .iter()
            .filter(|(_, d)| *d == Direction::Bullish)
            .count();
        let bearish = latest.len() - bullish;
        let direction = match bullish.cmp(&bearish) {
            std::cmp::Ordering::Greater => Direction::Bullish,
            std::cmp::Ordering::Less => Direction::Bearish,
            std::cmp::Ordering::Equal => latest.last().map(|(_, d)| *d)?,
        };

        let agreeing: Vec<SignalKind> = latest
            .iter()
            .filter(|(_, d)| *d == direction)
            .map(|(k, _)| *k)
            .collect();
        if agreeing.len() < 2 {
            return None;
        }

        // consume the contributing tags
        for (_, tag) in self.window.iter_mut() {
            if !tag.consumed && tag.direction == direction && agreeing.contains(&tag.kind) {
                tag.consumed = true;
            }
        }

        self.events_emitted += 1;
        Some(ConfluenceEvent {
            timestamp: now,
            price,
            direction,
            score: agreeing.len() as u8,
            signals: agreeing.iter().map(|k| k.as_str().to_string()).collect(),
        })
    }
}
