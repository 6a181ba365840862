use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Point-in-time rate-limit accounting for one provider.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitStatus {
    pub requests_remaining: u32,
    pub tokens_remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Dual token bucket (requests + tokens) seeded from config and resynced
/// from provider response headers when they are present.
pub struct ProviderRateLimiter {
    /// std Mutex — never held across await points.
    inner: Mutex<Buckets>,
    requests_per_minute: f64,
    tokens_per_minute: f64,
}

struct Buckets {
    requests: f64,
    tokens: f64,
    last_refill: Instant,
}

impl ProviderRateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            inner: Mutex::new(Buckets {
                requests: requests_per_minute as f64,
                tokens: tokens_per_minute as f64,
                last_refill: Instant::now(),
            }),
            requests_per_minute: requests_per_minute as f64,
            tokens_per_minute: tokens_per_minute as f64,
        }
    }

    fn refill(&self, buckets: &mut Buckets) {
        let elapsed_minutes = buckets.last_refill.elapsed().as_secs_f64() / 60.0;
        buckets.requests =
            (buckets.requests + elapsed_minutes * self.requests_per_minute).min(self.requests_per_minute);
        buckets.tokens =
            (buckets.tokens + elapsed_minutes * self.tokens_per_minute).min(self.tokens_per_minute);
        buckets.last_refill = Instant::now();
    }

    /// Take one request permit plus `estimated_tokens` token permits.
    /// On exhaustion returns the wait until a request permit frees up.
    pub fn try_acquire(&self, estimated_tokens: u32) -> Result<(), Duration> {
        let mut buckets = self.inner.lock().unwrap();
        self.refill(&mut buckets);

        if buckets.requests >= 1.0 && buckets.tokens >= estimated_tokens as f64 {
            buckets.requests -= 1.0;
            buckets.tokens -= estimated_tokens as f64;
            return Ok(());
        }

        let request_wait = if buckets.requests >= 1.0 {
            0.0
        } else {
            (1.0 - buckets.requests) / self.requests_per_minute * 60.0
        };
        let token_wait = if buckets.tokens >= estimated_tokens as f64 {
            0.0
        } else {
            (estimated_tokens as f64 - buckets.tokens) / self.tokens_per_minute * 60.0
        };

        Err(Duration::from_secs_f64(request_wait.max(token_wait).max(1.0)))
    }

    /// Overwrite bucket levels from authoritative provider headers.
    pub fn resync(&self, requests_remaining: u32, tokens_remaining: u32) {
        let mut buckets = self.inner.lock().unwrap();
        buckets.requests = (requests_remaining as f64).min(self.requests_per_minute);
        buckets.tokens = (tokens_remaining as f64).min(self.tokens_per_minute);
        buckets.last_refill = Instant::now();
    }

    pub fn status(&self) -> RateLimitStatus {
        let mut buckets = self.inner.lock().unwrap();
        self.refill(&mut buckets);

        // Earliest instant both buckets are full again.
        let request_deficit = self.requests_per_minute - buckets.requests;
        let token_deficit = self.tokens_per_minute - buckets.tokens;
        let minutes_to_full = (request_deficit / self.requests_per_minute)
            .max(token_deficit / self.tokens_per_minute)
            .max(0.0);

        RateLimitStatus {
            requests_remaining: buckets.requests as u32,
            tokens_remaining: buckets.tokens as u32,
            reset_at: Utc::now() + chrono::Duration::milliseconds((minutes_to_full * 60_000.0) as i64),
        }
    }
}
