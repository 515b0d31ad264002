//! Rate-limited dispatch queue for outbound Telegram API calls.
//!
//! Every channel-membership mutation and admin-status probe goes through one
//! shared `ApiQueue`, which bounds both how many calls are in flight and how
//! many may start inside a rolling window. Task failures settle individually
//! and never disturb siblings or the queue itself.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep_until, Instant};

/// Telegram tolerates roughly 30 msg/s overall; we stay well below it.
const TELEGRAM_CONCURRENCY: usize = 10;
const TELEGRAM_INTERVAL: Duration = Duration::from_millis(1000);
const TELEGRAM_INTERVAL_CAP: usize = 10;

pub struct ApiQueue {
    permits: Semaphore,
    starts: Mutex<VecDeque<Instant>>,
    interval: Duration,
    interval_cap: usize,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn count(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ApiQueue {
    pub fn new(concurrency: usize, interval: Duration, interval_cap: usize) -> Self {
        Self {
            permits: Semaphore::new(concurrency),
            starts: Mutex::new(VecDeque::with_capacity(interval_cap)),
            interval,
            interval_cap,
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn telegram_default() -> Self {
        Self::new(
            TELEGRAM_CONCURRENCY,
            TELEGRAM_INTERVAL,
            TELEGRAM_INTERVAL_CAP,
        )
    }

    /// Run `task` once a concurrency permit and a rate-window slot are free.
    /// Admission is FIFO: the tokio semaphore hands out permits in request
    /// order. The task's own output (including an `Err`) passes through
    /// untouched.
    pub async fn run<T>(&self, task: impl Future<Output = T>) -> T {
        let waiting = CounterGuard::count(&self.queued);
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("api queue semaphore is never closed");

        self.wait_for_window_slot().await;
        drop(waiting);

        let _running = CounterGuard::count(&self.in_flight);
        task.await
    }

    /// Block until fewer than `interval_cap` tasks have started within the
    /// trailing `interval`, then claim a start slot.
    async fn wait_for_window_slot(&self) {
        loop {
            let wake_at = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                while let Some(front) = starts.front() {
                    if now.duration_since(*front) >= self.interval {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }
                if starts.len() < self.interval_cap {
                    starts.push_back(now);
                    return;
                }
                // Oldest start ages out of the window first.
                starts[0] + self.interval
            };
            sleep_until(wake_at).await;
        }
    }

    /// Tasks admitted but not yet started, including those parked on the
    /// rate window.
    pub fn size(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently executing.
    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
