//! Minimum-interval pacing for external API calls.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Enforces a minimum spacing between consecutive external calls.
///
/// Shared by every export so the whole process stays under the tracker's rate limit.
pub struct CallPacer {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call is allowed, then claim the slot.
    ///
    /// The lock is held across the sleep so concurrent callers queue up
    /// instead of all waking at once.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Push the next slot out, e.g. after the tracker asked us to back off.
    pub async fn defer(&self, wait: Duration) {
        let mut last = self.last_call.lock().await;
        // next slot = now + wait, expressed as a fake last call
        let target = Instant::now() + wait;
        let fake_last = target.checked_sub(self.min_interval).unwrap_or(target);
        if last.map_or(true, |prev| prev < fake_last) {
            *last = Some(fake_last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_call_is_immediate() {
        let pacer = CallPacer::new(Duration::from_millis(500));
        let start = Instant::now();
        pacer.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        let pacer = CallPacer::new(Duration::from_millis(30));
        let start = Instant::now();

        let mut stamps = Vec::new();
        for _ in 0..4 {
            pacer.acquire().await;
            stamps.push(start.elapsed());
        }

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(29));
        }
        assert!(start.elapsed() >= Duration::from_millis(87));
    }

    #[tokio::test]
    async fn test_no_wait_after_idle_gap() {
        let pacer = CallPacer::new(Duration::from_millis(30));
        pacer.acquire().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let before = Instant::now();
        pacer.acquire().await;
        assert!(before.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_defer_pushes_next_call() {
        let pacer = CallPacer::new(Duration::from_millis(10));
        pacer.acquire().await;
        pacer.defer(Duration::from_millis(100)).await;

        let before = Instant::now();
        pacer.acquire().await;
        assert!(before.elapsed() >= Duration::from_millis(90));
    }
}
