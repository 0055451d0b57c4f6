//! Shared token-bucket rate limiter.
//!
//! One bucket per API key gates every LLM and embedding call across all
//! ingestion workers. Workers block while the bucket is empty; dropping the
//! `acquire` future (user cancellation) releases nothing and consumes
//! nothing.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(refill_per_sec: f64, capacity: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_refill = now;
    }

    /// Take `cost` tokens, waiting for refill when the bucket is empty.
    pub async fn acquire(&self, cost: f64) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                Self::refill(&mut state, self.capacity, self.refill_per_sec);
                if state.tokens >= cost {
                    state.tokens -= cost;
                    return;
                }
                Duration::from_secs_f64((cost - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait.min(Duration::from_millis(250))).await;
        }
    }

    /// Non-blocking variant used by tests and opportunistic callers.
    pub fn try_acquire(&self, cost: f64) -> bool {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }
}
