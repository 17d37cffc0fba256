//! Process-wide delivery rate limiting using the token bucket algorithm
//!
//! - The bucket holds at most `max` tokens and starts full
//! - Tokens refill continuously at `max / window`
//! - Each outbound message consumes one token per recipient
//! - A sender that finds the bucket empty sleeps until a token is due
//!
//! ```text
//! Rate limit: 100 per 60s
//! - A burst of 100 sends goes out immediately
//! - Then one send every 600ms
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use turbomarket_common::tracing;

use crate::RateLimitConfig;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.max.max(1));
        let window = Duration::from_millis(config.window_ms.max(1)).as_secs_f64();

        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / window,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    fn try_consume(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
        }
    }
}

/// One bucket shared by every handler in the process
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config)),
        }
    }

    /// Take a token if one is available now
    ///
    /// # Errors
    /// The time until the next token when the bucket is empty
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.bucket.lock().try_consume()
    }

    /// Take `tokens` tokens, waiting for each as needed
    pub async fn acquire(&self, tokens: usize) {
        for _ in 0..tokens {
            while let Err(wait) = self.try_acquire() {
                tracing::debug!(
                    wait_ms = wait.as_millis(),
                    "Delivery rate limit reached, waiting"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Tokens currently in the bucket
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.tokens
    }
}
