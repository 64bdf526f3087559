//! Delayed interpreter commands drained by the host's event loop.
//!
//! Each entry is a zero-argument procedure and the earliest time it may run.
//! A re-armable command that returns an integer `n` is not finished: it is
//! put back to run again `n` milliseconds later.

use std::sync::LazyLock;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::adapter::Scheme;
use crate::object::{Object, SchemeExt};

static CLOCK_START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Milliseconds on the process-local monotonic clock
pub fn now_millis() -> i64 {
    i64::try_from(CLOCK_START.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug)]
struct Delayed {
    command: Object,
    not_before: i64,
    rearm: bool,
}

#[derive(Debug, Default)]
pub struct DelayedQueue {
    entries: Mutex<Vec<Delayed>>,
}

impl DelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: Object, not_before: i64, rearm: bool) {
        trace!(not_before, rearm, "command scheduled");
        self.entries.lock().push(Delayed {
            command,
            not_before,
            rearm,
        });
    }

    /// Run `command` at the next drain; its result is ignored
    pub fn exec_delayed(&self, command: Object) {
        self.push(command, i64::MIN, false);
    }

    /// Run `command` at the next drain, re-arming it while it returns integers
    pub fn exec_delayed_pause(&self, command: Object) {
        self.push(command, now_millis(), true);
    }

    /// Run `command` once `delay` milliseconds have passed
    pub fn schedule(&self, command: Object, delay: i64) {
        self.push(command, now_millis().saturating_add(delay), true);
    }

    /// Run `command` once the clock reaches `not_before`
    pub fn schedule_at(&self, command: Object, not_before: i64) {
        self.push(command, not_before, true);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drain against the current clock
    pub fn drain<S: Scheme + ?Sized>(&self, scheme: &S) -> usize {
        self.drain_at(scheme, now_millis())
    }

    /// Run every command due at `now`, returning how many ran.
    ///
    /// Commands may schedule further commands; those wait for the next drain.
    pub fn drain_at<S: Scheme + ?Sized>(&self, scheme: &S, now: i64) -> usize {
        let due = std::mem::take(&mut *self.entries.lock());
        let mut kept = Vec::new();
        let mut ran = 0;
        for entry in due {
            if now < entry.not_before {
                kept.push(entry);
                continue;
            }
            ran += 1;
            match scheme.call_object(&entry.command, &[]) {
                Ok(result) if entry.rearm && result.is_int() => {
                    let pause = result.as_long();
                    trace!(pause, "command re-armed");
                    kept.push(Delayed {
                        not_before: now.saturating_add(pause),
                        ..entry
                    });
                }
                Ok(_) => {}
                Err(err) => error!(%err, "delayed command failed"),
            }
        }
        let mut entries = self.entries.lock();
        kept.append(&mut entries);
        *entries = kept;
        ran
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::backends::ArenaScheme;

    fn counter(scheme: &ArenaScheme, name: &str) -> i32 {
        scheme.eval(name).unwrap().as_int()
    }

    #[test]
    fn test_not_due_commands_stay_pending() {
        let scheme = ArenaScheme::new();
        scheme.eval("(define runs 0)").unwrap();
        let queue = DelayedQueue::new();
        queue.schedule_at(scheme.scheme_cmd("(set! runs (+ runs 1))").unwrap(), 100);

        assert_eq!(queue.drain_at(&scheme, 99), 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(counter(&scheme, "runs"), 0);

        assert_eq!(queue.drain_at(&scheme, 100), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.drain_at(&scheme, 1000), 0);
        assert_eq!(counter(&scheme, "runs"), 1);
    }

    #[test]
    fn test_integer_result_reschedules() {
        let scheme = ArenaScheme::new();
        scheme.eval("(define polls 0)").unwrap();
        let queue = DelayedQueue::new();
        let command = scheme
            .scheme_cmd("(set! polls (+ polls 1)) (if (< polls 3) 50 'done)")
            .unwrap();
        queue.schedule_at(command, 0);

        assert_eq!(queue.drain_at(&scheme, 10), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_at(&scheme, 59), 0);
        assert_eq!(queue.drain_at(&scheme, 60), 1);
        assert_eq!(queue.drain_at(&scheme, 110), 1);
        assert!(queue.is_empty());
        assert_eq!(counter(&scheme, "polls"), 3);
    }

    #[test]
    fn test_exec_delayed_never_rearms() {
        let scheme = ArenaScheme::new();
        let queue = DelayedQueue::new();
        queue.exec_delayed(scheme.scheme_cmd("5").unwrap());
        assert_eq!(queue.drain(&scheme), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failing_commands_are_dropped() {
        let scheme = ArenaScheme::new();
        let queue = DelayedQueue::new();
        queue.exec_delayed_pause(scheme.scheme_cmd("(car '())").unwrap());
        queue.exec_delayed_pause(scheme.scheme_cmd("1").unwrap());
        assert_eq!(queue.drain_at(&scheme, now_millis()), 2);
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
