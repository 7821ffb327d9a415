//! Clock and timer service
//!
//! Provides the engine's single time source: a monotonic "now" plus
//! cancellable one-shot and interval timers. Every scheduled callback
//! carries the run generation current at scheduling time; callbacks from a
//! previous run (stop bumps the generation) are discarded when they fire.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Handle to a scheduled timer
pub type TimerId = u64;

/// Tag grouping related timers for bulk cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerGroup {
    /// The stride interval advancing the slot rotation
    Stride,
    /// Per-slot timers (ending/prepare/grace/grace-end/settle) for one slot
    Slot(u64),
    /// The periodic status broadcast
    Status,
    /// Word-paced delivery timers
    Pacer,
}

struct TimerEntry {
    group: TimerGroup,
    handle: JoinHandle<()>,
}

/// Monotonic clock with cancellable scheduled callbacks
pub struct TimerService {
    origin: Instant,
    next_id: AtomicU64,
    generation: Arc<AtomicU64>,
    tasks: Arc<Mutex<HashMap<TimerId, TimerEntry>>>,
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            next_id: AtomicU64::new(1),
            generation: Arc::new(AtomicU64::new(0)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Milliseconds of monotonic time since the service was created
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Current run generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Schedule a one-shot callback after `delay_ms`.
    ///
    /// The callback is skipped if the run generation changed between
    /// scheduling and firing.
    pub fn schedule<F>(&self, delay_ms: u64, group: TimerGroup, f: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let gen_at_schedule = self.generation();
        let generation = Arc::clone(&self.generation);
        let tasks = Arc::clone(&self.tasks);

        // Hold the map lock across spawn + insert: a zero-delay task blocks
        // on the same lock when removing itself, so the insert always wins.
        let mut pending = self.tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            tasks.lock().remove(&id);
            if generation.load(Ordering::SeqCst) == gen_at_schedule {
                f();
            }
        });
        pending.insert(id, TimerEntry { group, handle });
        id
    }

    /// Schedule a repeating callback every `period_ms`, first firing one
    /// period from now.
    pub fn schedule_every<F>(&self, period_ms: u64, group: TimerGroup, f: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let gen_at_schedule = self.generation();
        let generation = Arc::clone(&self.generation);

        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(period_ms.max(1));
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if generation.load(Ordering::SeqCst) != gen_at_schedule {
                    return;
                }
                f();
            }
        });

        self.tasks.lock().insert(id, TimerEntry { group, handle });
        id
    }

    /// Cancel a single timer
    pub fn cancel(&self, id: TimerId) {
        if let Some(entry) = self.tasks.lock().remove(&id) {
            entry.handle.abort();
        }
    }

    /// Cancel every timer in a group
    pub fn cancel_group(&self, group: TimerGroup) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, entry| {
            if entry.group == group {
                entry.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel every pending timer and invalidate already-fired callbacks by
    /// bumping the run generation.
    pub fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut tasks = self.tasks.lock();
        for (_, entry) in tasks.drain() {
            entry.handle.abort();
        }
    }

    /// Number of timers currently pending
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_schedule_fires() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        timers.schedule(10, TimerGroup::Pacer, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let id = timers.schedule(30, TimerGroup::Pacer, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timers.cancel(id);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_group_is_selective() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        timers.schedule(20, TimerGroup::Slot(0), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = Arc::clone(&fired);
        timers.schedule(20, TimerGroup::Slot(1), move || {
            f.fetch_add(10, Ordering::SeqCst);
        });

        timers.cancel_group(TimerGroup::Slot(0));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_generation_filters_stale_callbacks() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        timers.schedule(20, TimerGroup::Pacer, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        // cancel_all bumps the generation; even a callback that had already
        // been polled off the timer wheel must not run.
        timers.cancel_all();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test]
    async fn test_interval_repeats_until_cancelled() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let id = timers.schedule_every(15, TimerGroup::Status, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        timers.cancel(id);
        let count = fired.load(Ordering::SeqCst);
        assert!(count >= 2, "expected at least 2 ticks, got {}", count);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), count);
    }

    #[tokio::test]
    async fn test_now_ms_is_monotonic() {
        let timers = TimerService::new();
        let a = timers.now_ms();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let b = timers.now_ms();
        assert!(b >= a + 10);
    }
}
