use std::ops::Mul;
use std::time::Duration;

use rand::Rng;

// Jitter span in seconds, centered on zero.
const JITTER_RANGE: f32 = 0.5;

/// Retransmission timer for handshake flights.
///
/// Starts at the configured RTO, doubles on every retry and applies a small
/// random jitter so concurrent handshakes do not synchronize.
pub struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            jitter: Self::jitter(),
            left: retries,
        }
    }

    pub fn reset(&mut self) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter();
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            self.rto
                .saturating_sub(Duration::from_secs_f32(self.jitter.abs()))
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(Duration::from_millis(50))
    }

    // A value between -0.25s and 0.25s.
    fn jitter() -> f32 {
        rand::thread_rng().gen::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self) {
        let (n, overflow) = self.left.overflowing_sub(1);

        if overflow {
            return;
        }

        self.left = n;
        self.jitter = Self::jitter();
        self.rto = self.rto.mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}
