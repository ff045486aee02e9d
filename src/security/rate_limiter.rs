//! Named request rate limits with per-identifier state

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: f64,
    pub strategy: RateLimitStrategy,
    pub burst_size: Option<u32>,
    /// Tokens per second
    pub refill_rate: Option<f64>,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: f64, strategy: RateLimitStrategy) -> Self {
        Self {
            max_requests,
            window_secs,
            strategy,
            burst_size: None,
            refill_rate: None,
        }
    }

    fn capacity(&self) -> f64 {
        self.burst_size.unwrap_or(self.max_requests) as f64
    }

    fn drain_rate(&self) -> f64 {
        if self.window_secs > 0.0 {
            self.max_requests as f64 / self.window_secs
        } else {
            f64::INFINITY
        }
    }

    fn refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or_else(|| self.drain_rate())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// Seconds until the limit is fully reset
    pub reset_after: f64,
    /// Seconds until the next request would be allowed
    pub retry_after: Option<f64>,
}

impl RateLimitResult {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: 999,
            reset_after: 0.0,
            retry_after: None,
        }
    }

    /// Whole seconds suitable for a `Retry-After` header
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after.map(|s| s.ceil().max(1.0) as u64).unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitInfo {
    pub limit_name: String,
    pub identifier: String,
    pub config: RateLimitConfig,
    pub current_usage: f64,
    pub remaining: u32,
}

#[derive(Debug, Clone)]
enum BucketState {
    Fixed { window: i64, count: u32 },
    Sliding(VecDeque<f64>),
    Token { tokens: f64, last: f64 },
    Leaky { level: f64, last: f64 },
}

#[derive(Debug)]
struct Entry {
    state: BucketState,
    last_seen: f64,
}

pub struct RateLimiter {
    limits: Mutex<HashMap<String, RateLimitConfig>>,
    entries: Mutex<HashMap<String, Entry>>,
}

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn key(name: &str, identifier: &str) -> String {
    format!("{}:{}", name, identifier)
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limits: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter with the service's standard limits
    pub fn with_defaults(per_minute: u32, per_hour: u32) -> Self {
        let limiter = Self::new();
        limiter.add_limit(
            "per_minute",
            RateLimitConfig::new(per_minute, 60.0, RateLimitStrategy::SlidingWindow),
        );
        limiter.add_limit(
            "per_hour",
            RateLimitConfig::new(per_hour, 3600.0, RateLimitStrategy::SlidingWindow),
        );
        limiter.add_limit("login", RateLimitConfig::new(5, 300.0, RateLimitStrategy::FixedWindow));
        limiter.add_limit("temp_url", RateLimitConfig::new(10, 60.0, RateLimitStrategy::TokenBucket));
        limiter
    }

    pub fn add_limit(&self, name: &str, config: RateLimitConfig) {
        self.limits.lock().insert(name.to_string(), config);
    }

    pub fn limit(&self, name: &str) -> Option<RateLimitConfig> {
        self.limits.lock().get(name).cloned()
    }

    pub fn check_limit(&self, name: &str, identifier: &str) -> RateLimitResult {
        self.check_limit_at(name, identifier, now_secs())
    }

    pub(crate) fn check_limit_at(&self, name: &str, identifier: &str, now: f64) -> RateLimitResult {
        let Some(config) = self.limit(name) else {
            return RateLimitResult::unlimited();
        };

        let mut entries = self.entries.lock();
        let entry = entries.entry(key(name, identifier)).or_insert_with(|| Entry {
            state: initial_state(&config, now),
            last_seen: now,
        });
        entry.last_seen = now;

        let result = apply(&config, &mut entry.state, now);
        if !result.allowed {
            debug!("Rate limit '{}' exceeded for {}", name, identifier);
        }
        result
    }

    /// Check several limits as one request. Nothing is recorded unless every
    /// limit allows it. Returns the rejecting limit, if any, with the result
    /// to report; an allowed request reports the first configured limit.
    pub fn check_limits<'a>(&self, names: &[&'a str], identifier: &str) -> (Option<&'a str>, RateLimitResult) {
        self.check_limits_at(names, identifier, now_secs())
    }

    pub(crate) fn check_limits_at<'a>(
        &self,
        names: &[&'a str],
        identifier: &str,
        now: f64,
    ) -> (Option<&'a str>, RateLimitResult) {
        let configs: Vec<(&'a str, RateLimitConfig)> = {
            let limits = self.limits.lock();
            names
                .iter()
                .filter_map(|name| limits.get(*name).map(|c| (*name, c.clone())))
                .collect()
        };

        let mut entries = self.entries.lock();
        let mut staged = Vec::with_capacity(configs.len());
        let mut reported = None;
        for (name, config) in &configs {
            let k = key(name, identifier);
            let mut state = entries
                .get(&k)
                .map(|e| e.state.clone())
                .unwrap_or_else(|| initial_state(config, now));
            let result = apply(config, &mut state, now);
            if !result.allowed {
                debug!("Rate limit '{}' exceeded for {}", name, identifier);
                return (Some(*name), result);
            }
            reported.get_or_insert(result);
            staged.push((k, state));
        }

        for (k, state) in staged {
            entries.insert(k, Entry { state, last_seen: now });
        }
        (None, reported.unwrap_or_else(RateLimitResult::unlimited))
    }

    /// Current usage without consuming a request
    pub fn get_limit_info(&self, name: &str, identifier: &str) -> Option<LimitInfo> {
        let config = self.limit(name)?;
        let now = now_secs();
        let entries = self.entries.lock();
        let usage = entries
            .get(&key(name, identifier))
            .map(|e| current_usage(&config, &e.state, now))
            .unwrap_or(0.0);
        let capacity = match config.strategy {
            RateLimitStrategy::TokenBucket => config.capacity(),
            _ => config.max_requests as f64,
        };

        Some(LimitInfo {
            limit_name: name.to_string(),
            identifier: identifier.to_string(),
            remaining: (capacity - usage).max(0.0).floor() as u32,
            current_usage: usage,
            config,
        })
    }

    pub fn reset_limit(&self, name: &str, identifier: &str) -> bool {
        self.entries.lock().remove(&key(name, identifier)).is_some()
    }

    /// Drop state not touched for `max_age_secs`. Returns how many entries went.
    pub fn cleanup_old_data(&self, max_age_secs: f64) -> usize {
        let cutoff = now_secs() - max_age_secs;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.last_seen >= cutoff);
        before - entries.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_state(config: &RateLimitConfig, now: f64) -> BucketState {
    match config.strategy {
        RateLimitStrategy::FixedWindow => BucketState::Fixed { window: -1, count: 0 },
        RateLimitStrategy::SlidingWindow => BucketState::Sliding(VecDeque::new()),
        RateLimitStrategy::TokenBucket => BucketState::Token {
            tokens: config.capacity(),
            last: now,
        },
        RateLimitStrategy::LeakyBucket => BucketState::Leaky { level: 0.0, last: now },
    }
}

fn apply(config: &RateLimitConfig, state: &mut BucketState, now: f64) -> RateLimitResult {
    let max = config.max_requests;
    match state {
        BucketState::Fixed { window, count } => {
            let current = (now / config.window_secs).floor() as i64;
            if *window != current {
                *window = current;
                *count = 0;
            }
            let reset_after = (current + 1) as f64 * config.window_secs - now;
            if *count < max {
                *count += 1;
                RateLimitResult {
                    allowed: true,
                    remaining: max - *count,
                    reset_after,
                    retry_after: None,
                }
            } else {
                RateLimitResult {
                    allowed: false,
                    remaining: 0,
                    reset_after,
                    retry_after: Some(reset_after),
                }
            }
        }
        BucketState::Sliding(stamps) => {
            while stamps.front().is_some_and(|t| *t <= now - config.window_secs) {
                stamps.pop_front();
            }
            if (stamps.len() as u32) < max {
                stamps.push_back(now);
                let oldest = stamps.front().copied().unwrap_or(now);
                RateLimitResult {
                    allowed: true,
                    remaining: max - stamps.len() as u32,
                    reset_after: oldest + config.window_secs - now,
                    retry_after: None,
                }
            } else {
                let oldest = stamps.front().copied().unwrap_or(now);
                let wait = (oldest + config.window_secs - now).max(0.0);
                RateLimitResult {
                    allowed: false,
                    remaining: 0,
                    reset_after: wait,
                    retry_after: Some(wait),
                }
            }
        }
        BucketState::Token { tokens, last } => {
            let capacity = config.capacity();
            let rate = config.refill_rate();
            *tokens = (*tokens + (now - *last) * rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                RateLimitResult {
                    allowed: true,
                    remaining: tokens.floor() as u32,
                    reset_after: (capacity - *tokens) / rate,
                    retry_after: None,
                }
            } else {
                let wait = (1.0 - *tokens) / rate;
                RateLimitResult {
                    allowed: false,
                    remaining: 0,
                    reset_after: (capacity - *tokens) / rate,
                    retry_after: Some(wait),
                }
            }
        }
        BucketState::Leaky { level, last } => {
            let rate = config.drain_rate();
            *level = (*level - (now - *last) * rate).max(0.0);
            *last = now;
            let max = max as f64;
            if *level + 1.0 <= max {
                *level += 1.0;
                RateLimitResult {
                    allowed: true,
                    remaining: (max - *level).floor() as u32,
                    reset_after: *level / rate,
                    retry_after: None,
                }
            } else {
                RateLimitResult {
                    allowed: false,
                    remaining: 0,
                    reset_after: *level / rate,
                    retry_after: Some((*level + 1.0 - max) / rate),
                }
            }
        }
    }
}

fn current_usage(config: &RateLimitConfig, state: &BucketState, now: f64) -> f64 {
    match state {
        BucketState::Fixed { window, count } => {
            if *window == (now / config.window_secs).floor() as i64 {
                *count as f64
            } else {
                0.0
            }
        }
        BucketState::Sliding(stamps) => stamps
            .iter()
            .filter(|t| **t > now - config.window_secs)
            .count() as f64,
        BucketState::Token { tokens, last } => {
            let refilled = (*tokens + (now - *last) * config.refill_rate()).min(config.capacity());
            config.capacity() - refilled
        }
        BucketState::Leaky { level, last } => (*level - (now - *last) * config.drain_rate()).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(strategy: RateLimitStrategy, max: u32, window: f64) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.add_limit("test", RateLimitConfig::new(max, window, strategy));
        limiter
    }

    #[test]
    fn test_unknown_limit_is_allowed() {
        let limiter = RateLimiter::new();
        let result = limiter.check_limit("nope", "1.2.3.4");
        assert!(result.allowed);
        assert_eq!(result.remaining, 999);
    }

    #[test]
    fn test_fixed_window_resets_on_next_window() {
        let l = limiter(RateLimitStrategy::FixedWindow, 2, 10.0);
        assert!(l.check_limit_at("test", "a", 100.0).allowed);
        assert!(l.check_limit_at("test", "a", 101.0).allowed);
        let blocked = l.check_limit_at("test", "a", 102.0);
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after, Some(8.0));

        // Other identifiers have their own counter
        assert!(l.check_limit_at("test", "b", 102.0).allowed);
        assert!(l.check_limit_at("test", "a", 110.0).allowed);
    }

    #[test]
    fn test_sliding_window_retry_after_tracks_oldest() {
        let l = limiter(RateLimitStrategy::SlidingWindow, 3, 60.0);
        for t in [0.0, 10.0, 20.0] {
            assert!(l.check_limit_at("test", "a", 1000.0 + t).allowed);
        }
        let blocked = l.check_limit_at("test", "a", 1030.0);
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after, Some(30.0));

        let later = l.check_limit_at("test", "a", 1061.0);
        assert!(later.allowed);
        assert_eq!(later.remaining, 0);
    }

    #[test]
    fn test_token_bucket_refills() {
        let l = RateLimiter::new();
        let mut config = RateLimitConfig::new(10, 60.0, RateLimitStrategy::TokenBucket);
        config.burst_size = Some(2);
        config.refill_rate = Some(1.0);
        l.add_limit("test", config);

        assert!(l.check_limit_at("test", "a", 0.0).allowed);
        assert!(l.check_limit_at("test", "a", 0.0).allowed);
        let blocked = l.check_limit_at("test", "a", 0.5);
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after, Some(0.5));
        assert!(l.check_limit_at("test", "a", 1.0).allowed);
    }

    #[test]
    fn test_combined_check_records_nothing_on_rejection() {
        let l = RateLimiter::new();
        l.add_limit("minute", RateLimitConfig::new(5, 60.0, RateLimitStrategy::SlidingWindow));
        l.add_limit("hour", RateLimitConfig::new(2, 3600.0, RateLimitStrategy::SlidingWindow));
        let names = ["minute", "hour"];

        let (rejected, first) = l.check_limits_at(&names, "a", 1000.0);
        assert_eq!(rejected, None);
        assert_eq!(first.remaining, 4);
        assert_eq!(l.check_limits_at(&names, "a", 1001.0).0, None);

        let (rejected, result) = l.check_limits_at(&names, "a", 1002.0);
        assert_eq!(rejected, Some("hour"));
        assert!(!result.allowed);
        for t in [1003.0, 1004.0, 1005.0] {
            assert_eq!(l.check_limits_at(&names, "a", t).0, Some("hour"));
        }

        // Rejected requests never reached the minute window
        let minute = l.check_limit_at("minute", "a", 1006.0);
        assert!(minute.allowed);
        assert_eq!(minute.remaining, 2);
    }

    #[test]
    fn test_combined_check_with_unknown_limits() {
        let l = RateLimiter::new();
        let (rejected, result) = l.check_limits_at(&["nope"], "a", 0.0);
        assert_eq!(rejected, None);
        assert!(result.allowed);
    }

    #[test]
    fn test_leaky_bucket_drains() {
        let l = limiter(RateLimitStrategy::LeakyBucket, 2, 2.0);
        assert!(l.check_limit_at("test", "a", 0.0).allowed);
        assert!(l.check_limit_at("test", "a", 0.0).allowed);
        assert!(!l.check_limit_at("test", "a", 0.0).allowed);
        // One unit drains per second
        assert!(l.check_limit_at("test", "a", 1.0).allowed);
    }

    #[test]
    fn test_reset_and_cleanup() {
        let l = limiter(RateLimitStrategy::SlidingWindow, 1, 60.0);
        assert!(l.check_limit("test", "a").allowed);
        assert!(!l.check_limit("test", "a").allowed);
        assert!(l.reset_limit("test", "a"));
        assert!(!l.reset_limit("test", "a"));
        assert!(l.check_limit("test", "a").allowed);

        let info = l.get_limit_info("test", "a").unwrap();
        assert_eq!(info.current_usage, 1.0);
        assert_eq!(info.remaining, 0);

        assert_eq!(l.cleanup_old_data(3600.0), 0);
        assert_eq!(l.cleanup_old_data(-1.0), 1);
    }

    #[test]
    fn test_default_limits() {
        let l = RateLimiter::with_defaults(60, 1000);
        assert_eq!(l.limit("login").unwrap().strategy, RateLimitStrategy::FixedWindow);
        assert_eq!(l.limit("temp_url").unwrap().strategy, RateLimitStrategy::TokenBucket);
        assert_eq!(l.limit("per_minute").unwrap().max_requests, 60);
        for _ in 0..5 {
            assert!(l.check_limit("login", "x").allowed);
        }
        assert!(!l.check_limit("login", "x").allowed);
    }
}
