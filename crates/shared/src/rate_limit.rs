use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::{ConfigError, RateLimitConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Window,
    Burst,
}

impl RateLimitScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::Burst => "burst",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied {
        scope: RateLimitScope,
        retry_after_seconds: u64,
    },
}

#[derive(Debug, Clone)]
struct RateCounter {
    count: u32,
    window_expiry: Instant,
    burst_count: u32,
    burst_expiry: Instant,
}

impl RateCounter {
    fn open(now: Instant, config: &RateLimitConfig) -> Self {
        Self {
            count: 0,
            window_expiry: now + config.window(),
            burst_count: 0,
            burst_expiry: now + config.burst_window(),
        }
    }
}

/// Fixed-window admission counter keyed by session. Each key lives in its own map shard
/// entry, so updating one key never waits on another key's counter.
#[derive(Debug)]
pub struct RateLimitWindow {
    config: RateLimitConfig,
    counters: DashMap<String, RateCounter>,
}

impl RateLimitWindow {
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            counters: DashMap::new(),
        })
    }

    pub fn admit(&self, key: &str) -> bool {
        self.check(key) == RateLimitDecision::Allowed
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| RateCounter::open(now, &self.config));

        // Expiry is fixed at creation and never extended by later hits.
        if now >= counter.window_expiry {
            counter.count = 0;
            counter.window_expiry = now + self.config.window();
        }
        if now >= counter.burst_expiry {
            counter.burst_count = 0;
            counter.burst_expiry = now + self.config.burst_window();
        }

        if counter.count >= self.config.per_minute_max {
            return RateLimitDecision::Denied {
                scope: RateLimitScope::Window,
                retry_after_seconds: retry_after_seconds(
                    counter.window_expiry.saturating_duration_since(now),
                ),
            };
        }
        if counter.burst_count >= self.config.burst_max {
            return RateLimitDecision::Denied {
                scope: RateLimitScope::Burst,
                retry_after_seconds: retry_after_seconds(
                    counter.burst_expiry.saturating_duration_since(now),
                ),
            };
        }

        counter.count = counter.count.saturating_add(1);
        counter.burst_count = counter.burst_count.saturating_add(1);
        RateLimitDecision::Allowed
    }

    pub fn prune_expired(&self, now: Instant) {
        self.counters
            .retain(|_, counter| now < counter.window_expiry);
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let window = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                window.prune_expired(Instant::now());
            }
        })
    }
}

fn retry_after_seconds(remaining: Duration) -> u64 {
    let seconds = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        seconds.saturating_add(1)
    } else {
        seconds.max(1)
    }
}
