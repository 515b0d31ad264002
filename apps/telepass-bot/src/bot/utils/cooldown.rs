//! Per-admin command throttle. One command per interval per admin; the map
//! is swept lazily once it grows past a threshold, so long-gone admins do
//! not accumulate forever.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const SWEEP_THRESHOLD: usize = 1024;

pub struct CommandCooldown {
    min_interval: Duration,
    last_seen: Mutex<HashMap<i64, Instant>>,
}

impl CommandCooldown {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// True if `admin_id` may run a command now; records the attempt when
    /// admitted. Refused attempts do not reset the window.
    pub async fn try_acquire(&self, admin_id: i64) -> bool {
        let mut map = self.last_seen.lock().await;
        let now = Instant::now();
        if map.len() > SWEEP_THRESHOLD {
            let min_interval = self.min_interval;
            map.retain(|_, last| now.duration_since(*last) < min_interval);
        }
        match map.get(&admin_id) {
            Some(last) if now.duration_since(*last) < self.min_interval => false,
            _ => {
                map.insert(admin_id, now);
                true
            }
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.last_seen.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_command_per_second_per_admin() {
        let cooldown = CommandCooldown::per_second();
        assert!(cooldown.try_acquire(1).await);
        assert!(!cooldown.try_acquire(1).await);
        // A different admin is unaffected.
        assert!(cooldown.try_acquire(2).await);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(cooldown.try_acquire(1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_attempt_does_not_extend_the_window() {
        let cooldown = CommandCooldown::per_second();
        assert!(cooldown.try_acquire(1).await);
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!cooldown.try_acquire(1).await);
        tokio::time::advance(Duration::from_millis(500)).await;
        // 1.1s since the admitted attempt, despite the refusal in between.
        assert!(cooldown.try_acquire(1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_swept_once_the_map_grows() {
        let cooldown = CommandCooldown::per_second();
        for id in 0..(SWEEP_THRESHOLD as i64 + 10) {
            assert!(cooldown.try_acquire(id).await);
        }
        assert!(cooldown.tracked().await > SWEEP_THRESHOLD);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cooldown.try_acquire(999_999).await);
        assert!(cooldown.tracked().await <= 2);
    }
}
