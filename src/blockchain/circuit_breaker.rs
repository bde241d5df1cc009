//! Per-resource circuit breaker with two independent failure tracks.
//!
//! The general track counts ordinary failures, the service-unavailable
//! track counts upstream overload. Either track can open the circuit. A
//! track resets once its cooldown has elapsed since its last failure, or on
//! any success.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub unavailable_threshold: u32,
    pub unavailable_reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 8,
            reset_timeout: Duration::from_secs(120),
            unavailable_threshold: 3,
            unavailable_reset_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub resource_key: String,
    pub failure_count: u32,
    pub last_failure_time: Option<i64>,
    pub service_unavailable_count: u32,
    pub last_service_unavailable_time: Option<i64>,
}

impl CircuitBreakerState {
    fn new(resource_key: &str) -> Self {
        Self {
            resource_key: resource_key.to_string(),
            failure_count: 0,
            last_failure_time: None,
            service_unavailable_count: 0,
            last_service_unavailable_time: None,
        }
    }

    /// Reset any track whose cooldown has passed (strictly greater than the window).
    fn decay(&mut self, now: i64, config: &BreakerConfig) {
        if let Some(last) = self.last_failure_time {
            if now - last > config.reset_timeout.as_millis() as i64 {
                self.failure_count = 0;
                self.last_failure_time = None;
            }
        }
        if let Some(last) = self.last_service_unavailable_time {
            if now - last > config.unavailable_reset_timeout.as_millis() as i64 {
                self.service_unavailable_count = 0;
                self.last_service_unavailable_time = None;
            }
        }
    }

    pub fn is_open(&self, config: &BreakerConfig) -> bool {
        self.failure_count >= config.failure_threshold
            || self.service_unavailable_count >= config.unavailable_threshold
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    states: DashMap<String, CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            states: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether a call to `resource_key` may proceed now.
    pub fn allow(&self, resource_key: &str) -> bool {
        let now = self.clock.now_millis();
        match self.states.get_mut(resource_key) {
            Some(mut state) => {
                let was_open = state.is_open(&self.config);
                state.decay(now, &self.config);
                let open = state.is_open(&self.config);
                if was_open && !open {
                    info!(resource = resource_key, "Circuit closed after cooldown");
                }
                !open
            }
            None => true,
        }
    }

    pub fn record_success(&self, resource_key: &str) {
        if let Some(mut state) = self.states.get_mut(resource_key) {
            if state.failure_count > 0 || state.service_unavailable_count > 0 {
                info!(resource = resource_key, "Circuit reset after success");
            }
            state.failure_count = 0;
            state.last_failure_time = None;
            state.service_unavailable_count = 0;
            state.last_service_unavailable_time = None;
        }
    }

    pub fn record_failure(&self, resource_key: &str, is_service_unavailable: bool) {
        let now = self.clock.now_millis();
        let mut state = self
            .states
            .entry(resource_key.to_string())
            .or_insert_with(|| CircuitBreakerState::new(resource_key));

        state.decay(now, &self.config);
        let was_open = state.is_open(&self.config);

        if is_service_unavailable {
            state.service_unavailable_count += 1;
            state.last_service_unavailable_time = Some(now);
        } else {
            state.failure_count += 1;
            state.last_failure_time = Some(now);
        }

        if !was_open && state.is_open(&self.config) {
            warn!(
                resource = resource_key,
                failures = state.failure_count,
                unavailable = state.service_unavailable_count,
                "Circuit opened"
            );
        }
    }

    /// Snapshot of the breaker state for `resource_key`, if any failure was ever recorded.
    pub fn state(&self, resource_key: &str) -> Option<CircuitBreakerState> {
        self.states.get(resource_key).map(|s| s.clone())
    }

    pub fn reset(&self, resource_key: &str) {
        self.states.remove(resource_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const KEY: &str = "transactions:1";

    fn breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (CircuitBreaker::new(BreakerConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn opens_after_eight_general_failures() {
        let (breaker, _) = breaker();
        for _ in 0..7 {
            breaker.record_failure(KEY, false);
        }
        assert!(breaker.allow(KEY));

        breaker.record_failure(KEY, false);
        assert!(!breaker.allow(KEY));
        assert!(breaker.allow("transactions:137"));
    }

    #[test]
    fn general_track_resets_after_cooldown() {
        let (breaker, clock) = breaker();
        for _ in 0..8 {
            breaker.record_failure(KEY, false);
        }

        clock.advance(Duration::from_secs(120));
        assert!(!breaker.allow(KEY));

        clock.advance(Duration::from_millis(1));
        assert!(breaker.allow(KEY));
        assert_eq!(breaker.state(KEY).unwrap().failure_count, 0);
    }

    #[test]
    fn service_unavailable_track_is_isolated() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure(KEY, true);
        }

        let state = breaker.state(KEY).unwrap();
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.service_unavailable_count, 3);
        assert!(!breaker.allow(KEY));

        // Still open after the general window
        clock.advance(Duration::from_secs(200));
        assert!(!breaker.allow(KEY));

        clock.advance(Duration::from_secs(101));
        assert!(breaker.allow(KEY));
    }

    #[test]
    fn success_resets_both_tracks() {
        let (breaker, _) = breaker();
        for _ in 0..5 {
            breaker.record_failure(KEY, false);
        }
        for _ in 0..3 {
            breaker.record_failure(KEY, true);
        }
        assert!(!breaker.allow(KEY));

        breaker.record_success(KEY);
        let state = breaker.state(KEY).unwrap();
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.service_unavailable_count, 0);
        assert!(breaker.allow(KEY));
    }

    #[test]
    fn blocked_calls_do_not_count() {
        let (breaker, _) = breaker();
        for _ in 0..8 {
            breaker.record_failure(KEY, false);
        }
        for _ in 0..10 {
            assert!(!breaker.allow(KEY));
        }
        assert_eq!(breaker.state(KEY).unwrap().failure_count, 8);
    }

    #[test]
    fn stale_failures_decay_before_counting() {
        let (breaker, clock) = breaker();
        for _ in 0..7 {
            breaker.record_failure(KEY, false);
        }
        clock.advance(Duration::from_secs(121));
        breaker.record_failure(KEY, false);

        assert_eq!(breaker.state(KEY).unwrap().failure_count, 1);
        assert!(breaker.allow(KEY));
    }
}
