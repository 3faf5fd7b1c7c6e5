use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Poison-tolerant lock: a panicking holder must not wedge the other
/// threads of a running game.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TimerState {
    Pending,
    Canceled,
    Fired,
}

#[derive(Debug)]
struct TimerShared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

/// Owned reference to one scheduled callback.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    /// Idempotent: canceling an already-fired or already-canceled handle
    /// is a no-op. A canceled callback is dropped without running.
    pub fn cancel(&self) {
        let mut state = lock(&self.shared.state);
        if *state == TimerState::Pending {
            *state = TimerState::Canceled;
            self.shared.signal.notify_all();
        }
    }

    /// True once the callback has either run or been canceled.
    pub fn is_settled(&self) -> bool {
        *lock(&self.shared.state) != TimerState::Pending
    }
}

/// Runs `callback` on a worker thread after `delay`. Cancellation wakes
/// the worker immediately instead of letting it sleep out the delay.
pub fn schedule_once<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let shared = Arc::new(TimerShared {
        state: Mutex::new(TimerState::Pending),
        signal: Condvar::new(),
    });
    let worker = Arc::clone(&shared);

    let spawned = thread::Builder::new()
        .name("padcade-timer".into())
        .spawn(move || {
            let deadline = Instant::now() + delay;
            let mut state = lock(&worker.state);
            loop {
                if *state == TimerState::Canceled {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (next, _) = worker
                    .signal
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(|err| err.into_inner());
                state = next;
            }
            *state = TimerState::Fired;
            drop(state);
            callback();
        });

    if let Err(err) = spawned {
        log::warn!("timer thread failed to spawn, tick dropped: {err}");
        *lock(&shared.state) = TimerState::Canceled;
    }

    TimerHandle { shared }
}

/// Holder for the single outstanding timer of one concern (the tick, a
/// transient effect). Arming always cancels the previous handle first,
/// so two competing callbacks for the same concern cannot coexist.
#[derive(Debug, Default)]
pub struct TimerSlot {
    current: Mutex<Option<TimerHandle>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut current = lock(&self.current);
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        *current = Some(schedule_once(delay, callback));
    }

    pub fn cancel(&self) {
        if let Some(previous) = lock(&self.current).take() {
            previous.cancel();
        }
    }

    /// True while a scheduled callback is still outstanding.
    pub fn is_armed(&self) -> bool {
        matches!(&*lock(&self.current), Some(handle) if !handle.is_settled())
    }
}

/// Monotone map from game progress (score, level, elapsed rounds) to the
/// tick interval, clamped to `[floor, start]` for every progress value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ramp {
    start: Duration,
    floor: Duration,
    step: Duration,
}

impl Ramp {
    /// `step` is how much faster each unit of progress makes the tick.
    /// A floor above the start collapses to a constant interval.
    pub fn new(start: Duration, floor: Duration, step: Duration) -> Self {
        Self {
            start,
            floor: floor.min(start),
            step,
        }
    }

    pub const fn start(&self) -> Duration {
        self.start
    }

    pub const fn floor(&self) -> Duration {
        self.floor
    }

    pub fn interval(&self, progress: i64) -> Duration {
        let units = progress.clamp(0, u32::MAX as i64) as u32;
        self.start
            .saturating_sub(self.step.saturating_mul(units))
            .max(self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;

    const STEP: Duration = Duration::from_millis(30);

    fn ramp() -> Ramp {
        Ramp::new(Duration::from_millis(800), Duration::from_millis(300), STEP)
    }

    #[test]
    fn ramp_interval_stays_clamped_for_all_progress() {
        let ramp = ramp();

        for progress in [i64::MIN, -5, 0, 1, 10, 17, 1_000, i64::MAX] {
            let interval = ramp.interval(progress);
            assert!(interval >= ramp.floor(), "progress {progress}");
            assert!(interval <= ramp.start(), "progress {progress}");
        }
    }

    #[test]
    fn ramp_shrinks_linearly_until_the_floor() {
        let ramp = ramp();

        assert_eq!(ramp.interval(0), Duration::from_millis(800));
        assert_eq!(ramp.interval(4), Duration::from_millis(680));
        assert_eq!(ramp.interval(100), Duration::from_millis(300));
    }

    #[test]
    fn inverted_floor_collapses_to_a_constant() {
        let ramp = Ramp::new(Duration::from_millis(100), Duration::from_millis(900), STEP);

        assert_eq!(ramp.interval(0), Duration::from_millis(100));
        assert_eq!(ramp.interval(50), Duration::from_millis(100));
    }

    #[test]
    fn scheduled_callback_fires_once() {
        let (tx, rx) = mpsc::channel();

        let handle = schedule_once(Duration::from_millis(10), move || {
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(handle.is_settled());
    }

    #[test]
    fn canceled_callback_never_runs() {
        let fired = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&fired);

        let handle = schedule_once(Duration::from_millis(50), move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        handle.cancel(); // idempotent

        thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(handle.is_settled());
    }

    #[test]
    fn rearming_a_slot_cancels_the_previous_concern() {
        let fired = Arc::new(AtomicU32::new(0));
        let slot = TimerSlot::new();

        let first = Arc::clone(&fired);
        slot.arm(Duration::from_millis(60), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        slot.arm(Duration::from_millis(10), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!slot.is_armed());
    }

    #[test]
    fn slot_cancel_leaves_nothing_armed() {
        let slot = TimerSlot::new();
        slot.arm(Duration::from_secs(60), || {});

        assert!(slot.is_armed());
        slot.cancel();
        assert!(!slot.is_armed());
        slot.cancel(); // no-op on an empty slot
    }
}
