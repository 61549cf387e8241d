// MIT License - Copyright (c) 2021 TJForc
// Resettable one-shot timers owned by a connection or listener

//! Each [`Timeout`] is a small task that owns its due time and alive flag.
//! Every operation is a message into that task's mailbox, answered with a
//! snapshot once applied, so `stop()` and `free()` have taken effect by the
//! time they return: no firing can follow them.
//!
//! A [`TimeoutRegistry`] remembers the mailboxes of the timers it created and
//! frees all of them at teardown. Registry and handle may race to free the
//! same timer; the first request wins and the other is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

static NEXT_TIMEOUT_ID: AtomicU64 = AtomicU64::new(1);

const MAILBOX_DEPTH: usize = 4;

/// Snapshot returned by [`Timeout::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutInfo {
    pub alive: bool,
    /// Zero when not alive
    pub remaining: Duration,
}

enum Control {
    Restart,
    Reset { duration: Duration, fudge: Duration },
    Stop,
    Free,
    Query,
}

struct Request {
    control: Control,
    reply: oneshot::Sender<TimeoutInfo>,
}

type Mailbox = mpsc::Sender<Request>;
type Owned = Mutex<HashMap<u64, Mailbox>>;
type Post = Box<dyn Fn() + Send + 'static>;

fn lock(owned: &Owned) -> MutexGuard<'_, HashMap<u64, Mailbox>> {
    owned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `duration` moved by a uniform random offset in `[-fudge, +fudge]`, never below zero.
pub fn jittered(duration: Duration, fudge: Duration) -> Duration {
    if fudge.is_zero() {
        return duration;
    }
    let f = fudge.as_secs_f64();
    let offset = rand::rng().random_range(-f..=f);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

fn poster<E: Clone + Send + 'static>(queue: mpsc::UnboundedSender<E>, event: E) -> Post {
    Box::new(move || {
        if queue.send(event.clone()).is_err() {
            debug!("Timeout fired into a closed queue");
        }
    })
}

struct TimerState {
    duration: Duration,
    fudge: Duration,
    due: Instant,
    alive: bool,
}

impl TimerState {
    fn restart(&mut self) {
        self.due = Instant::now() + jittered(self.duration, self.fudge);
        self.alive = true;
    }

    fn info(&self) -> TimeoutInfo {
        TimeoutInfo {
            alive: self.alive,
            remaining: if self.alive {
                self.due.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            },
        }
    }
}

async fn run_timer(id: u64, mut state: TimerState, mut mailbox: mpsc::Receiver<Request>, post: Post) {
    loop {
        tokio::select! {
            biased;
            request = mailbox.recv() => {
                let Some(Request { control, reply }) = request else {
                    break;
                };
                let free = matches!(control, Control::Free);
                match control {
                    Control::Restart => state.restart(),
                    Control::Reset { duration, fudge } => {
                        state.duration = duration;
                        state.fudge = fudge;
                        state.restart();
                    }
                    Control::Stop | Control::Free => state.alive = false,
                    Control::Query => {}
                }
                let _ = reply.send(state.info());
                if free {
                    mailbox.close();
                    break;
                }
            }
            _ = sleep_until(state.due), if state.alive => {
                state.alive = false;
                post();
            }
        }
    }
    debug!("Timeout {} finished", id);
}

async fn send_request(mailbox: &Mailbox, control: Control) -> Option<TimeoutInfo> {
    let (reply, answer) = oneshot::channel();
    mailbox.send(Request { control, reply }).await.ok()?;
    answer.await.ok()
}

/// Handle to a running timer. Armed on creation.
pub struct Timeout {
    id: u64,
    mailbox: Mailbox,
    owner: Option<Weak<Owned>>,
}

impl Timeout {
    /// Unowned timer posting `event` into `queue` each time it fires.
    ///
    /// Dropping the handle of an unowned timer ends it.
    pub fn new<E: Clone + Send + 'static>(
        duration: Duration,
        fudge: Duration,
        queue: mpsc::UnboundedSender<E>,
        event: E,
    ) -> Self {
        Self::spawn(duration, fudge, poster(queue, event), None)
    }

    fn spawn(duration: Duration, fudge: Duration, post: Post, owner: Option<&Arc<Owned>>) -> Self {
        let id = NEXT_TIMEOUT_ID.fetch_add(1, Ordering::Relaxed);
        let (mailbox, inbox) = mpsc::channel(MAILBOX_DEPTH);
        let mut state = TimerState {
            duration,
            fudge,
            due: Instant::now(),
            alive: false,
        };
        state.restart();

        if let Some(owned) = owner {
            lock(owned).insert(id, mailbox.clone());
        }
        tokio::spawn(run_timer(id, state, inbox, post));

        Self {
            id,
            mailbox,
            owner: owner.map(Arc::downgrade),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// # Panics
    ///
    /// Panics if the timer was already freed through its registry.
    async fn request(&self, control: Control) -> TimeoutInfo {
        match send_request(&self.mailbox, control).await {
            Some(info) => info,
            None => panic!("timeout {} used after free", self.id),
        }
    }

    /// Re-arm with the current duration and fudge.
    pub async fn restart(&self) {
        self.request(Control::Restart).await;
    }

    /// Replace duration and fudge, then re-arm.
    pub async fn reset(&self, duration: Duration, fudge: Duration) {
        self.request(Control::Reset { duration, fudge }).await;
    }

    /// Disarm. The timer may be restarted later.
    pub async fn stop(&self) {
        self.request(Control::Stop).await;
    }

    pub async fn info(&self) -> TimeoutInfo {
        self.request(Control::Query).await
    }

    /// Disarm for good and leave the owning registry.
    ///
    /// A no-op when the registry already released this timer.
    pub async fn free(self) {
        if let Some(owned) = self.owner.as_ref().and_then(Weak::upgrade) {
            lock(&owned).remove(&self.id);
        }
        if send_request(&self.mailbox, Control::Free).await.is_none() {
            debug!("Timeout {} was already released", self.id);
        }
    }
}

/// Set of timers freed together when their owner goes away.
#[derive(Default)]
pub struct TimeoutRegistry {
    owned: Arc<Owned>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned timer posting `event` into `queue`.
    pub fn timeout<E: Clone + Send + 'static>(
        &self,
        duration: Duration,
        fudge: Duration,
        queue: mpsc::UnboundedSender<E>,
        event: E,
    ) -> Timeout {
        Timeout::spawn(duration, fudge, poster(queue, event), Some(&self.owned))
    }

    /// Owned timer running `post` each time it fires.
    pub fn timeout_with<F>(&self, duration: Duration, fudge: Duration, post: F) -> Timeout
    where
        F: Fn() + Send + 'static,
    {
        Timeout::spawn(duration, fudge, Box::new(post), Some(&self.owned))
    }

    /// Number of timers still owned.
    pub fn len(&self) -> usize {
        lock(&self.owned).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free every timer still owned. Returns once none of them can fire.
    pub async fn release_all(&self) {
        let drained: Vec<(u64, Mailbox)> = lock(&self.owned).drain().collect();
        for (id, mailbox) in drained {
            if send_request(&mailbox, Control::Free).await.is_none() {
                debug!("Timeout {} was freed concurrently", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Tick {
        A,
        B,
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let _timeout = Timeout::new(Duration::from_secs(10), Duration::ZERO, tx, Tick::A);

        assert_eq!(rx.recv().await, Some(Tick::A));
        assert!(start.elapsed() >= Duration::from_secs(10));

        let again = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(again.is_err(), "fired twice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_before_due_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timeout = Timeout::new(Duration::from_secs(10), Duration::ZERO, tx, Tick::A);
        tokio::time::sleep(Duration::from_secs(5)).await;
        timeout.free().await;
        // the poster held the only sender
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_restart() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timeout = Timeout::new(Duration::from_secs(10), Duration::ZERO, tx, Tick::B);
        timeout.stop().await;
        assert_eq!(
            timeout.info().await,
            TimeoutInfo {
                alive: false,
                remaining: Duration::ZERO
            }
        );

        let quiet = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(quiet.is_err());

        let start = Instant::now();
        timeout.restart().await;
        assert!(timeout.info().await.alive);
        assert_eq!(rx.recv().await, Some(Tick::B));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(!timeout.info().await.alive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_changes_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timeout = Timeout::new(Duration::from_secs(100), Duration::ZERO, tx, Tick::A);
        let start = Instant::now();
        timeout.reset(Duration::from_secs(2), Duration::ZERO).await;
        let info = timeout.info().await;
        assert!(info.alive);
        assert!(info.remaining <= Duration::from_secs(2));

        assert_eq!(rx.recv().await, Some(Tick::A));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_all() {
        let registry = TimeoutRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _a = registry.timeout(Duration::from_secs(5), Duration::ZERO, tx.clone(), Tick::A);
        let _b = registry.timeout(Duration::from_secs(6), Duration::ZERO, tx, Tick::B);
        assert_eq!(registry.len(), 2);

        registry.release_all().await;
        assert!(registry.is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_disowns() {
        let registry = TimeoutRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let timeout = registry.timeout(Duration::from_secs(5), Duration::ZERO, tx, Tick::A);
        assert_eq!(registry.len(), 1);
        timeout.free().await;
        assert!(registry.is_empty());
        registry.release_all().await;
    }

    #[tokio::test]
    async fn test_release_races_free() {
        for _ in 0..50 {
            let registry = TimeoutRegistry::new();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let timeout = registry.timeout(Duration::from_secs(5), Duration::ZERO, tx, Tick::A);
            tokio::join!(registry.release_all(), timeout.free());
            assert!(registry.is_empty());
            assert_eq!(rx.recv().await, None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_closure() {
        let registry = TimeoutRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timeout = registry.timeout_with(Duration::from_secs(1), Duration::ZERO, move || {
            let _ = tx.send("fired");
        });
        assert_eq!(rx.recv().await, Some("fired"));
        registry.release_all().await;
    }

    #[tokio::test]
    #[should_panic(expected = "used after free")]
    async fn test_use_after_release_panics() {
        let registry = TimeoutRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let timeout = registry.timeout(Duration::from_secs(5), Duration::ZERO, tx, Tick::A);
        registry.release_all().await;
        timeout.restart().await;
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jittered(Duration::from_secs(3), Duration::ZERO), Duration::from_secs(3));
        for _ in 0..200 {
            let d = jittered(Duration::from_secs(10), Duration::from_secs(2));
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12));
            let _ = jittered(Duration::from_secs(1), Duration::from_secs(5));
        }
    }
}
