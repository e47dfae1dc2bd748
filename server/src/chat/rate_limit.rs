use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Per-connection admission control over a trailing time window.
///
/// Owned by the connection actor, so it needs no locking and is released
/// with the connection.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    max: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: VecDeque::with_capacity(max),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_messages, config.window())
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Admit and record an attempt at `now`, or reject it without recording.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= self.max {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}
