use std::time::Duration;

/// Exponential backoff cursor.
///
/// Each tailer owns its own instance; nothing is shared between streams.
#[derive(Clone, Debug)]
pub struct Backoff {
    cur: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { cur: min, min, max }
    }

    /// Go back to the minimum delay after a successful operation
    pub fn reset(&mut self) {
        self.cur = self.min;
    }

    /// Delay to wait now; doubles the next one up to the maximum
    pub fn next_delay(&mut self) -> Duration {
        let d = self.cur;
        self.cur = std::cmp::min(self.cur.saturating_mul(2), self.max);
        d
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10))
    }
}
