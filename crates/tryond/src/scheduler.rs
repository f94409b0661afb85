//! Frame-loop scheduling.
//!
//! The session never sleeps or spins on its own: it asks a [`Scheduler`] for
//! one tick at a time and cancels the outstanding one on stop. Production
//! uses [`FrameClock`]; tests substitute a scheduler they fire by hand.

use std::time::{Duration, Instant};

/// Identifies one scheduled tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

pub trait Scheduler {
    /// Arrange for one future tick. At most one tick is outstanding; scheduling
    /// again replaces the previous one.
    fn schedule(&mut self) -> TickHandle;

    /// Cancel a scheduled tick. Unknown or already-fired handles are ignored.
    fn cancel(&mut self, handle: TickHandle);

    /// Wait until the scheduled tick is due and hand it over.
    /// Returns `None` when nothing is scheduled.
    fn next_due(&mut self) -> Option<TickHandle>;
}

/// Display-rate clock.
///
/// Each tick is due one refresh interval after the previous one fired. A tick
/// scheduled after an overrun is due immediately; missed intervals are
/// dropped, never replayed.
#[derive(Debug)]
pub struct FrameClock {
    interval: Duration,
    next_id: u64,
    pending: Option<(TickHandle, Instant)>,
    last_fired: Option<Instant>,
}

impl FrameClock {
    pub fn new(refresh_hz: f32) -> Self {
        let hz = if refresh_hz.is_finite() && refresh_hz > 0.0 { refresh_hz } else { 60.0 };
        Self {
            interval: Duration::from_secs_f32(1.0 / hz),
            next_id: 0,
            pending: None,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Scheduler for FrameClock {
    fn schedule(&mut self) -> TickHandle {
        self.next_id += 1;
        let handle = TickHandle(self.next_id);
        let now = Instant::now();
        let due = match self.last_fired {
            Some(last) => (last + self.interval).max(now),
            None => now,
        };
        self.pending = Some((handle, due));
        handle
    }

    fn cancel(&mut self, handle: TickHandle) {
        if matches!(self.pending, Some((h, _)) if h == handle) {
            self.pending = None;
        }
    }

    fn next_due(&mut self) -> Option<TickHandle> {
        let (handle, due) = self.pending.take()?;
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
        self.last_fired = Some(Instant::now());
        Some(handle)
    }
}

/// Deterministic scheduler for tests: records every call, never sleeps.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualScheduler {
    next_id: u64,
    pub pending: Option<TickHandle>,
    pub scheduled: Vec<TickHandle>,
    pub cancelled: Vec<TickHandle>,
    pub fired: Vec<TickHandle>,
}

#[cfg(test)]
impl Scheduler for ManualScheduler {
    fn schedule(&mut self) -> TickHandle {
        self.next_id += 1;
        let handle = TickHandle(self.next_id);
        self.pending = Some(handle);
        self.scheduled.push(handle);
        handle
    }

    fn cancel(&mut self, handle: TickHandle) {
        if self.pending == Some(handle) {
            self.pending = None;
        }
        self.cancelled.push(handle);
    }

    fn next_due(&mut self) -> Option<TickHandle> {
        let handle = self.pending.take()?;
        self.fired.push(handle);
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clock_single_outstanding_tick() {
        let mut clock = FrameClock::new(1000.0);
        let a = clock.schedule();
        let b = clock.schedule();
        assert_ne!(a, b);
        assert_eq!(clock.next_due(), Some(b));
        assert_eq!(clock.next_due(), None);
    }

    #[test]
    fn test_frame_clock_cancel() {
        let mut clock = FrameClock::new(1000.0);
        let a = clock.schedule();
        clock.cancel(a);
        assert_eq!(clock.next_due(), None);
    }

    #[test]
    fn test_frame_clock_ignores_stale_cancel() {
        let mut clock = FrameClock::new(1000.0);
        let a = clock.schedule();
        let b = clock.schedule();
        clock.cancel(a);
        assert_eq!(clock.next_due(), Some(b));
    }

    #[test]
    fn test_frame_clock_paces_ticks() {
        let mut clock = FrameClock::new(100.0);
        clock.schedule();
        clock.next_due();
        let start = Instant::now();
        clock.schedule();
        clock.next_due();
        assert!(start.elapsed() >= Duration::from_millis(8), "{:?}", start.elapsed());
    }

    #[test]
    fn test_frame_clock_overrun_does_not_burst() {
        let mut clock = FrameClock::new(1000.0);
        clock.schedule();
        clock.next_due();
        std::thread::sleep(Duration::from_millis(5));
        // Five intervals missed; the next tick is due now, and only one is pending.
        clock.schedule();
        assert!(clock.next_due().is_some());
        assert!(clock.next_due().is_none());
    }

    #[test]
    fn test_frame_clock_invalid_rate_defaults() {
        let clock = FrameClock::new(0.0);
        assert_eq!(clock.interval(), Duration::from_secs_f32(1.0 / 60.0));
    }

    #[test]
    fn test_manual_scheduler_records() {
        let mut s = ManualScheduler::default();
        let a = s.schedule();
        s.cancel(a);
        assert_eq!(s.next_due(), None);
        let b = s.schedule();
        assert_eq!(s.next_due(), Some(b));
        assert_eq!(s.scheduled, vec![a, b]);
        assert_eq!(s.cancelled, vec![a]);
        assert_eq!(s.fired, vec![b]);
    }
}
