//! Per-op token-bucket rate limiting.
//!
//! Exceeding the budget fails fast with a retryable error instead of
//! blocking the caller.

use std::sync::Mutex;
use std::time::Instant;

/// A continuous-refill token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled: Instant,
}

impl TokenBucket {
    /// A bucket refilling at `rate` tokens/second with the same burst size.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: rate,
                refilled: Instant::now(),
            }),
            rate,
            burst: rate,
        }
    }

    /// Take one token if available.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.refilled = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_exhaustion() {
        let bucket = TokenBucket::new(5.0);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire(), "burst exhausted");
    }

    #[test]
    fn test_refills_over_time() {
        let bucket = TokenBucket::new(1000.0);
        while bucket.try_acquire() {}
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_acquire(), "tokens refill continuously");
    }
}
