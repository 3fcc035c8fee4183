// src/services/acw_countdown.rs
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const TICK: Duration = Duration::from_secs(1);

struct RunningCountdown {
    id: u64,
    token: CancellationToken,
    completed: Arc<AtomicBool>,
    remaining: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl RunningCountdown {
    /// Returns true if this pre-empted a completion that had not fired yet
    fn cancel(mut self) -> bool {
        let preempted = !self.completed.swap(true, Ordering::SeqCst);
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        preempted
    }

    fn is_running(&self) -> bool {
        !self.completed.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }
}

/// After-Call-Work countdown.
///
/// At most one countdown runs at a time; `start` cancels the previous one
/// before scheduling. Ticks and the completion check run under the slot
/// lock, so once `start` or `cancel` returns nothing from an older countdown
/// is observed. The completion callback fires at most once per countdown.
///
/// `on_tick` runs while the slot is locked and must not call back into the
/// countdown. `on_complete` runs after the lock is released.
pub struct AcwCountdown {
    slot: Arc<Mutex<Option<RunningCountdown>>>,
    next_id: AtomicU64,
}

impl Default for AcwCountdown {
    fn default() -> Self {
        Self::new()
    }
}

impl AcwCountdown {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start counting down from `seconds`, returning the countdown id
    pub fn start<T, C>(&self, seconds: u32, on_tick: T, on_complete: C) -> u64
    where
        T: Fn(u32) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.slot.lock();

        if let Some(previous) = slot.take() {
            if previous.cancel() {
                debug!("Replaced running ACW countdown {}", id - 1);
            }
        }

        let token = CancellationToken::new();
        let completed = Arc::new(AtomicBool::new(false));
        let remaining = Arc::new(AtomicU32::new(seconds));

        info!("⏳ ACW countdown {} started: {}s", id, seconds);
        on_tick(seconds);

        if seconds == 0 {
            completed.store(true, Ordering::SeqCst);
            *slot = Some(RunningCountdown { id, token, completed, remaining, handle: None });
            drop(slot);
            on_complete();
            return id;
        }

        let handle = tokio::spawn(Self::run(
            id,
            self.slot.clone(),
            token.clone(),
            completed.clone(),
            remaining.clone(),
            on_tick,
            on_complete,
        ));

        *slot = Some(RunningCountdown {
            id,
            token,
            completed,
            remaining,
            handle: Some(handle),
        });
        id
    }

    async fn run<T, C>(
        id: u64,
        slot: Arc<Mutex<Option<RunningCountdown>>>,
        token: CancellationToken,
        completed: Arc<AtomicBool>,
        remaining: Arc<AtomicU32>,
        on_tick: T,
        on_complete: C,
    ) where
        T: Fn(u32) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let mut ticks = interval_at(Instant::now() + TICK, TICK);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticks.tick() => {}
            }

            let finished = {
                let guard = slot.lock();
                let current = guard.as_ref().is_some_and(|c| c.id == id);
                if !current || token.is_cancelled() || completed.load(Ordering::SeqCst) {
                    return;
                }

                let left = remaining.load(Ordering::SeqCst).saturating_sub(1);
                remaining.store(left, Ordering::SeqCst);
                on_tick(left);

                left == 0
                    && completed
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
            };

            if finished {
                info!("✅ ACW countdown {} finished", id);
                on_complete();
                return;
            }
        }
    }

    /// Cancel the running countdown. Returns true if a pending completion
    /// was pre-empted.
    pub fn cancel(&self) -> bool {
        let previous = self.slot.lock().take();
        match previous {
            Some(countdown) => {
                let id = countdown.id;
                let preempted = countdown.cancel();
                if preempted {
                    info!("🛑 ACW countdown {} cancelled", id);
                }
                preempted
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|c| c.is_running())
    }

    /// Seconds left on the running countdown
    pub fn remaining(&self) -> Option<u32> {
        self.slot
            .lock()
            .as_ref()
            .filter(|c| c.is_running())
            .map(|c| c.remaining.load(Ordering::SeqCst))
    }
}

impl Drop for AcwCountdown {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    /// Paused clock: sleeping auto-advances through every pending tick
    async fn advance_secs(secs: u64) {
        tokio::time::sleep(Duration::from_millis(secs * 1000 + 500)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_exactly_once() {
        let countdown = AcwCountdown::new();
        let completions = counter();
        let ticks = Arc::new(Mutex::new(Vec::new()));

        let done = completions.clone();
        let seen = ticks.clone();
        countdown.start(
            3,
            move |left| seen.lock().push(left),
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(countdown.is_running());
        assert_eq!(countdown.remaining(), Some(3));

        advance_secs(5).await;

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(*ticks.lock(), vec![3, 2, 1, 0]);
        assert!(!countdown.is_running());
        assert!(!countdown.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_completion() {
        let countdown = AcwCountdown::new();
        let completions = counter();

        let done = completions.clone();
        countdown.start(3, |_| {}, move || {
            done.fetch_add(1, Ordering::SeqCst);
        });

        advance_secs(1).await;
        assert!(countdown.cancel());
        advance_secs(5).await;

        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert!(!countdown.is_running());
        assert_eq!(countdown.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_silences_previous_countdown() {
        let countdown = AcwCountdown::new();
        let first_ticks = counter();
        let first_done = counter();
        let second_done = counter();

        let ticks = first_ticks.clone();
        let done = first_done.clone();
        countdown.start(
            2,
            move |_| {
                ticks.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        );
        let ticks_before_restart = first_ticks.load(Ordering::SeqCst);

        let done = second_done.clone();
        countdown.start(4, |_| {}, move || {
            done.fetch_add(1, Ordering::SeqCst);
        });

        advance_secs(6).await;

        assert_eq!(first_ticks.load(Ordering::SeqCst), ticks_before_restart);
        assert_eq!(first_done.load(Ordering::SeqCst), 0);
        assert_eq!(second_done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_seconds_completes_immediately() {
        let countdown = AcwCountdown::new();
        let completions = counter();
        let done = completions.clone();
        countdown.start(0, |_| {}, move || {
            done.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(!countdown.is_running());
    }
}
