//! 4.A Clock & Timer Engine.
//!
//! Produces a consistent "remaining seconds" view for a box using a
//! monotonic clock, regardless of which client last acted. The trait exists
//! so tests can advance time without sleeping, the way the teacher's
//! `TimerService<T: Timebase>` (`knhk-workflow-engine/src/services/timer.rs`)
//! is generic over an abstract time source rather than calling
//! `Instant::now()` directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Abstract monotonic clock. `SystemClock` is used in production;
/// `ManualClock` lets tests advance time deterministically.
pub trait MonotonicClock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock anchored at construction time whose "now" can be advanced by a
/// fixed offset without an actual `sleep`. `Instant` cannot be constructed
/// from an arbitrary timestamp on stable Rust, so tests advance a real base
/// instead of faking one.
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.offset_ms.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Timer phase, mirroring spec.md §3 `timerState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle { remaining_sec: u32 },
    Running { deadline: Instant },
    Paused { remaining_sec: u32 },
}

impl TimerPhase {
    pub fn state_name(&self) -> &'static str {
        match self {
            TimerPhase::Idle { .. } => "idle",
            TimerPhase::Running { .. } => "running",
            TimerPhase::Paused { .. } => "paused",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TimerPhase::Running { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, TimerPhase::Paused { .. })
    }
}

/// `startFresh(box)`: deadline = now + preset, state = running.
pub fn start_fresh(clock: &dyn MonotonicClock, preset_sec: u32) -> TimerPhase {
    TimerPhase::Running {
        deadline: clock.now() + Duration::from_secs(preset_sec as u64),
    }
}

/// `pause(box)`: stores `max(0, ceil((deadline-now)/1000))`, state = paused.
/// Pausing mid-overtime floors to zero — spec.md §4.A's formula is written
/// with an explicit `max(0, ...)`, unlike the live `remaining()` getter below
/// which is allowed to go negative (see `DESIGN.md` "Negative remaining").
pub fn pause(clock: &dyn MonotonicClock, phase: TimerPhase) -> TimerPhase {
    match phase {
        TimerPhase::Running { deadline } => {
            let remaining = signed_remaining_sec(clock.now(), deadline).max(0) as u32;
            TimerPhase::Paused { remaining_sec: remaining }
        }
        other => other,
    }
}

/// `resume(box)`: deadline = now + remaining, state = running.
pub fn resume(clock: &dyn MonotonicClock, phase: TimerPhase) -> TimerPhase {
    match phase {
        TimerPhase::Paused { remaining_sec } => TimerPhase::Running {
            deadline: clock.now() + Duration::from_secs(remaining_sec as u64),
        },
        other => other,
    }
}

/// `remaining(box)`: derived getter, spec.md §3 invariant 4. When
/// `allow_negative` is true (the config default) overtime is reported as a
/// negative value rather than floored at zero, so displays can show it;
/// see `DESIGN.md` for why this differs from the `pause()` formula above.
pub fn remaining_sec(clock: &dyn MonotonicClock, phase: TimerPhase, allow_negative: bool) -> i64 {
    match phase {
        TimerPhase::Running { deadline } => {
            let secs = signed_remaining_sec(clock.now(), deadline);
            if allow_negative {
                secs
            } else {
                secs.max(0)
            }
        }
        TimerPhase::Idle { remaining_sec } | TimerPhase::Paused { remaining_sec } => remaining_sec as i64,
    }
}

fn signed_remaining_sec(now: Instant, deadline: Instant) -> i64 {
    let ms: i64 = if deadline >= now {
        (deadline - now).as_millis() as i64
    } else {
        -((now - deadline).as_millis() as i64)
    };
    ((ms as f64) / 1000.0).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_remaining_decreases() {
        let clock = ManualClock::new();
        let phase = start_fresh(&clock, 300);
        assert_eq!(remaining_sec(&clock, phase, true), 300);
        clock.advance(Duration::from_secs(2));
        assert!(remaining_sec(&clock, phase, true) <= 298);
    }

    #[test]
    fn pause_then_resume_preserves_remaining() {
        let clock = ManualClock::new();
        let phase = start_fresh(&clock, 300);
        clock.advance(Duration::from_secs(100));
        let paused = pause(&clock, phase);
        assert!(matches!(paused, TimerPhase::Paused { remaining_sec } if (199..=200).contains(&remaining_sec)));
        let resumed = resume(&clock, paused);
        assert!(resumed.is_running());
        assert!(remaining_sec(&clock, resumed, true) <= 200);
    }

    #[test]
    fn overtime_goes_negative_when_allowed() {
        let clock = ManualClock::new();
        let phase = start_fresh(&clock, 5);
        clock.advance(Duration::from_secs(8));
        assert!(remaining_sec(&clock, phase, true) < 0);
        assert_eq!(remaining_sec(&clock, phase, false), 0);
    }

    #[test]
    fn remaining_monotonically_non_increasing_while_running() {
        let clock = ManualClock::new();
        let phase = start_fresh(&clock, 300);
        let mut last = remaining_sec(&clock, phase, true);
        for _ in 0..5 {
            clock.advance(Duration::from_millis(700));
            let now_remaining = remaining_sec(&clock, phase, true);
            assert!(now_remaining <= last);
            last = now_remaining;
        }
    }

    #[test]
    fn pause_idempotent_against_repeated_command() {
        let clock = ManualClock::new();
        let phase = start_fresh(&clock, 300);
        clock.advance(Duration::from_secs(10));
        let paused_once = pause(&clock, phase);
        let paused_twice = pause(&clock, paused_once);
        assert_eq!(paused_once, paused_twice);
    }
}
