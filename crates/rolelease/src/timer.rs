//! Expiration timers.
//!
//! One tokio task per armed key. The registry guarantees at most one live
//! timer per [`GrantKey`]: arming again aborts the previous task. Each arming
//! gets a generation number so a finishing task only clears its own slot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use rolelease_core::{Clock, GrantKey};

struct TimerSlot {
    generation: u64,
    expires_at: i64,
    handle: JoinHandle<()>,
}

/// Registry of live expiration timers keyed by `(subject, kind)`.
#[derive(Default)]
pub struct TimerRegistry {
    slots: Mutex<HashMap<GrantKey, TimerSlot>>,
    next_generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<GrantKey, TimerSlot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a timer that runs `fire` once `clock` reaches `expires_at`.
    ///
    /// A deadline already in the past fires immediately. Any timer already
    /// armed for `key` is aborted and replaced. Returns the generation.
    pub fn arm<F, Fut>(
        self: &Arc<Self>,
        key: GrantKey,
        expires_at: i64,
        clock: Arc<dyn Clock>,
        fire: F,
    ) -> u64
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(self);
        let task_key = key.clone();

        // Spawn while holding the slot lock so an immediate fire cannot
        // release before the slot exists.
        let mut slots = self.slots();
        let handle = tokio::spawn(async move {
            sleep_until_deadline(clock.as_ref(), expires_at).await;
            fire().await;
            release(&registry, &task_key, generation);
        });

        if let Some(previous) = slots.insert(
            key,
            TimerSlot {
                generation,
                expires_at,
                handle,
            },
        ) {
            previous.handle.abort();
        }

        generation
    }

    /// Abort and remove the timer for `key`. Returns whether one was live.
    pub fn cancel(&self, key: &GrantKey) -> bool {
        match self.slots().remove(key) {
            Some(slot) => {
                let live = !slot.handle.is_finished();
                slot.handle.abort();
                live
            }
            None => false,
        }
    }

    /// Forget the timer for `key` if it is armed for `expires_at`, without
    /// aborting it. The task finishes untracked, so a later `arm` or
    /// `cancel` for the key cannot cut it short.
    pub fn detach(&self, key: &GrantKey, expires_at: i64) -> bool {
        let mut slots = self.slots();
        if slots.get(key).map(|slot| slot.expires_at) == Some(expires_at) {
            slots.remove(key);
            true
        } else {
            false
        }
    }

    /// Deadline of the live timer for `key`, if any.
    pub fn armed_deadline(&self, key: &GrantKey) -> Option<i64> {
        self.slots()
            .get(key)
            .filter(|slot| !slot.handle.is_finished())
            .map(|slot| slot.expires_at)
    }

    pub fn is_armed(&self, key: &GrantKey) -> bool {
        self.armed_deadline(key).is_some()
    }

    /// Keys with a live timer.
    pub fn armed_keys(&self) -> Vec<GrantKey> {
        self.slots()
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| !slot.handle.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every timer. Used on shutdown.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TimerSlot> = self.slots().drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            slot.handle.abort();
        }
        count
    }
}

fn release(registry: &Weak<TimerRegistry>, key: &GrantKey, generation: u64) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let mut slots = registry.slots();
    if slots.get(key).map(|slot| slot.generation) == Some(generation) {
        slots.remove(key);
    }
}

/// Sleep until `clock` reads at least `expires_at`.
///
/// Re-checks the clock after every wake so a timer never fires early when
/// the wall clock lags the runtime's timer.
pub async fn sleep_until_deadline(clock: &dyn Clock, expires_at: i64) {
    loop {
        let left = expires_at.saturating_sub(clock.now_millis());
        if left <= 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(left as u64)).await;
    }
}

/// A clock anchored to a wall-clock instant that then advances with tokio's
/// monotonic time.
///
/// Immune to wall-clock jumps while running, and follows paused/advanced time
/// in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin_millis: i64,
    origin: Instant,
}

impl MonotonicClock {
    /// Start reading `origin_millis` now.
    pub fn starting_at(origin_millis: i64) -> Self {
        Self {
            origin_millis,
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> i64 {
        let elapsed = self.origin.elapsed().as_millis() as i64;
        self.origin_millis.saturating_add(elapsed)
    }
}
