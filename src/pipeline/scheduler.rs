//! Capture pacing
//!
//! The scheduler never sleeps on its own: it computes the next wake-up from the
//! time actually elapsed and leaves the sleeping to the coordinator loop, which
//! arms a single `sleep_until` on [`Scheduler::deadline`]. Stopping simply
//! disarms the deadline, so there is never a stray timer to cancel.

use log::trace;
use std::time::Duration;

use super::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Scheduled,
    Throttled,
    Capturing,
}

/// Decision taken on a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Capture and send a frame now
    Capture,
    /// Too early; wake again after the remaining part of the interval
    Wait(Duration),
    /// Pending bound reached; wake again after the backoff
    Throttle(Duration),
    /// Scheduler is (now) stopped
    Halt,
}

#[derive(Debug)]
pub struct Scheduler {
    interval: Duration,
    backoff: Duration,
    max_pending: usize,
    state: SchedulerState,
    last_capture: Timestamp,
    deadline: Option<Timestamp>,
}

impl Scheduler {
    pub fn new(interval: Duration, backoff: Duration, max_pending: usize) -> Self {
        Self {
            interval,
            backoff,
            max_pending,
            state: SchedulerState::Stopped,
            last_capture: Timestamp::ZERO,
            deadline: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != SchedulerState::Stopped
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the coordinator should call [`Scheduler::tick`] next
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Arm the loop. `now` counts as the last capture, so the first frame is
    /// taken one interval later.
    pub fn start(&mut self, now: Timestamp) {
        self.state = SchedulerState::Scheduled;
        self.last_capture = now;
        self.deadline = Some(now);
    }

    /// Disarm the loop. Returns whether it was running.
    pub fn stop(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = SchedulerState::Stopped;
        self.deadline = None;
        was_active
    }

    /// Decide what to do at `now` with `pending` frames awaiting results.
    ///
    /// `may_run` carries the session's running flag and the channel's state;
    /// when it is false the scheduler stops itself.
    pub fn tick(&mut self, now: Timestamp, pending: usize, may_run: bool) -> Tick {
        if self.state == SchedulerState::Stopped {
            return Tick::Halt;
        }
        if !may_run {
            trace!("Scheduler: session inactive, stopping");
            self.stop();
            return Tick::Halt;
        }

        if pending >= self.max_pending {
            self.state = SchedulerState::Throttled;
            self.deadline = Some(now.add(self.backoff));
            return Tick::Throttle(self.backoff);
        }

        let elapsed = now.since(self.last_capture);
        if elapsed < self.interval {
            let remaining = self.interval - elapsed;
            self.state = SchedulerState::Scheduled;
            self.deadline = Some(now.add(remaining));
            return Tick::Wait(remaining);
        }

        self.last_capture = now;
        self.state = SchedulerState::Capturing;
        self.deadline = None;
        Tick::Capture
    }

    /// The capture-and-send attempt finished, successfully or not.
    pub fn settle(&mut self, now: Timestamp) {
        if self.state == SchedulerState::Capturing {
            self.state = SchedulerState::Scheduled;
            self.deadline = Some(now.add(self.interval));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(Duration::from_millis(500), Duration::from_millis(100), 2)
    }

    fn ts(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_waits_for_remaining_interval() {
        let mut sched = scheduler();
        sched.start(ts(0));
        assert_eq!(sched.deadline(), Some(ts(0)));

        assert_eq!(sched.tick(ts(120), 0, true), Tick::Wait(Duration::from_millis(380)));
        assert_eq!(sched.deadline(), Some(ts(500)));
        assert_eq!(sched.state(), SchedulerState::Scheduled);
    }

    #[test]
    fn test_captures_then_settles() {
        let mut sched = scheduler();
        sched.start(ts(0));

        assert_eq!(sched.tick(ts(500), 0, true), Tick::Capture);
        assert_eq!(sched.state(), SchedulerState::Capturing);
        assert_eq!(sched.deadline(), None);

        sched.settle(ts(560));
        assert_eq!(sched.deadline(), Some(ts(1060)));
        assert_eq!(sched.tick(ts(1060), 1, true), Tick::Capture);
    }

    #[test]
    fn test_throttles_at_pending_bound() {
        let mut sched = scheduler();
        sched.start(ts(0));

        assert_eq!(
            sched.tick(ts(700), 2, true),
            Tick::Throttle(Duration::from_millis(100))
        );
        assert_eq!(sched.state(), SchedulerState::Throttled);
        assert_eq!(sched.deadline(), Some(ts(800)));

        assert_eq!(sched.tick(ts(800), 1, true), Tick::Capture);
    }

    #[test]
    fn test_halts_when_session_inactive() {
        let mut sched = scheduler();
        sched.start(ts(0));

        assert_eq!(sched.tick(ts(600), 0, false), Tick::Halt);
        assert!(!sched.is_active());
        assert_eq!(sched.deadline(), None);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut sched = scheduler();
        sched.start(ts(0));

        assert!(sched.stop());
        assert!(!sched.stop());
        assert_eq!(sched.tick(ts(1000), 0, true), Tick::Halt);

        // a late settle from an attempt that outlived the stop changes nothing
        sched.settle(ts(1000));
        assert_eq!(sched.deadline(), None);
    }

    #[test]
    fn test_is_due() {
        let mut sched = scheduler();
        assert!(!sched.is_due(ts(0)));
        sched.start(ts(10));
        assert!(!sched.is_due(ts(9)));
        assert!(sched.is_due(ts(10)));
    }
}
