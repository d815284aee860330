//! Jittered exponential backoff for transient Redis failures.

use rand::Rng;
use std::time::Duration;

/// Backoff policy: `initial * multiplier^attempt`, capped, plus jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 – 1.0).
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped * self.jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }
}
