use std::time::Duration;
use tokio::time::Instant;

/// Absolute wall-clock bound for a blocking wait.
///
/// Timeouts are given in milliseconds: `0` waits forever, a negative value
/// returns immediately, anything else is relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn from_timeout_ms(timeout_ms: i64) -> Self {
        let now = Instant::now();
        let at = match timeout_ms {
            0 => None,
            t if t < 0 => Some(now),
            t => now.checked_add(Duration::from_millis(t as u64)),
        };
        Self { at }
    }

    pub fn never() -> Self {
        Self { at: None }
    }

    /// A bound too far out to represent is no bound at all.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(duration),
        }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left before expiry; `None` means no bound.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn has_passed(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Caps `interval` to what is left before the deadline.
    pub fn clamp(&self, interval: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(interval),
            None => interval,
        }
    }
}
