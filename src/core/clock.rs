// Clock Abstraction
// Wall clock for live/demo; virtual clock with pause/speed for replay.
// Every timer in the pipeline reads time through this handle so a replay of
// the same input produces the same observable behavior.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch on the system clock.
pub fn wall_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pipeline time source. Cheap to clone and share across tasks.
#[derive(Clone)]
pub enum Clock {
    Wall,
    Replay(ReplayClock),
}

impl Clock {
    pub fn now_ms(&self) -> u64 {
        match self {
            Clock::Wall => wall_now_ms(),
            Clock::Replay(clock) => clock.now_ms(),
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Clock::Replay(_))
    }

    pub fn replay(&self) -> Option<&ReplayClock> {
        match self {
            Clock::Replay(clock) => Some(clock),
            Clock::Wall => None,
        }
    }
}

/// Snapshot of the replay controller state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayState {
    pub paused: bool,
    pub speed: f64,
    pub virtual_ms: u64,
}

struct VirtualInner {
    virtual_ms: f64,
    speed: f64,
    paused: bool,
    anchor: Instant,
}

impl VirtualInner {
    /// Fold elapsed real time into virtual time and re-anchor.
    fn settle(&mut self) {
        let elapsed = self.anchor.elapsed().as_secs_f64() * 1000.0;
        if !self.paused {
            self.virtual_ms += elapsed * self.speed;
        }
        self.anchor = Instant::now();
    }
}

/// Virtual clock advancing `real_delta × speed` while running, 0 when paused.
#[derive(Clone)]
pub struct ReplayClock {
    inner: Arc<Mutex<VirtualInner>>,
}

impl ReplayClock {
    pub const MIN_SPEED: f64 = 0.1;
    pub const MAX_SPEED: f64 = 1000.0;

    pub fn new(origin_ms: u64, speed: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualInner {
                virtual_ms: origin_ms as f64,
                speed: speed.clamp(Self::MIN_SPEED, Self::MAX_SPEED),
                paused: false,
                anchor: Instant::now(),
            })),
        }
    }

    pub fn now_ms(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.settle();
        inner.virtual_ms as u64
    }

    /// Returns true when the call changed the running state.
    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.settle();
        let changed = !inner.paused;
        inner.paused = true;
        changed
    }

    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.settle();
        let changed = inner.paused;
        inner.paused = false;
        changed
    }

    pub fn set_speed(&self, speed: f64) -> f64 {
        let clamped = speed.clamp(Self::MIN_SPEED, Self::MAX_SPEED);
        let mut inner = self.inner.lock();
        inner.settle();
        inner.speed = clamped;
        clamped
    }

    /// Skip forward over a gap in the recording. No effect when the target is
    /// already in the past.
    pub fn jump_to(&self, target_ms: u64) {
        let mut inner = self.inner.lock();
        inner.settle();
        if (target_ms as f64) > inner.virtual_ms {
            inner.virtual_ms = target_ms as f64;
        }
    }

    pub fn state(&self) -> ReplayState {
        let mut inner = self.inner.lock();
        inner.settle();
        ReplayState {
            paused: inner.paused,
            speed: inner.speed,
            virtual_ms: inner.virtual_ms as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wall_clock_advances() {
        let clock = Clock::Wall;
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_ms() >= a);
    }

    #[test]
    fn test_paused_clock_is_frozen() {
        let clock = ReplayClock::new(1_000_000, 1.0);
        clock.pause();
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(20));
        let b = clock.now_ms();
        assert_eq!(a, b);
    }

    #[test]
    fn test_speed_multiplier() {
        let clock = ReplayClock::new(0, 100.0);
        std::thread::sleep(Duration::from_millis(30));
        // 30ms real at 100x is ~3000ms virtual; allow generous scheduling slack
        let now = clock.now_ms();
        assert!(now >= 1_000, "virtual clock should be well ahead, got {}", now);
    }

    #[test]
    fn test_jump_never_goes_backwards() {
        let clock = ReplayClock::new(5_000, 1.0);
        clock.jump_to(10_000);
        assert!(clock.now_ms() >= 10_000);
        clock.jump_to(2_000);
        assert!(clock.now_ms() >= 10_000);
    }

    #[test]
    fn test_pause_resume_transitions() {
        let clock = ReplayClock::new(0, 1.0);
        assert!(clock.pause());
        assert!(!clock.pause());
        assert!(clock.resume());
        assert!(!clock.resume());
    }

    #[test]
    fn test_speed_clamped() {
        let clock = ReplayClock::new(0, 1.0);
        assert_eq!(clock.set_speed(0.0), ReplayClock::MIN_SPEED);
        assert_eq!(clock.set_speed(1e9), ReplayClock::MAX_SPEED);
    }
}
