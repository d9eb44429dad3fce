//! Fixed-window cap on outbound subscribe/unsubscribe requests.

use std::time::Duration;

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct Throttle {
    per_window: u32,
    window_start: Instant,
    used: u32,
}

impl Throttle {
    pub(crate) fn new(per_sec: u32) -> Self {
        Self { per_window: per_sec.max(1), window_start: Instant::now(), used: 0 }
    }

    /// Take one slot at `now`. Returns the instant to wait for when the
    /// current window is full; the slot is then taken in the next window.
    pub(crate) fn reserve(&mut self, now: Instant) -> Option<Instant> {
        if now.duration_since(self.window_start) >= WINDOW {
            self.window_start = now;
            self.used = 0;
        }
        if self.used < self.per_window {
            self.used += 1;
            return None;
        }
        let next = self.window_start + WINDOW;
        self.window_start = next;
        self.used = 1;
        Some(next)
    }

    pub(crate) async fn acquire(&mut self) {
        if let Some(until) = self.reserve(Instant::now()) {
            tokio::time::sleep_until(until).await;
        }
    }
}
