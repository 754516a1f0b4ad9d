// ABOUTME: Per capability/target circuit breaker.
// ABOUTME: Consecutive failures open the circuit; a cool-down admits one probe.

use crate::config::BreakerConfig;
use crate::types::TargetName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Circuit {
    Closed,
    Open,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Tracks consecutive failures per (capability, target) pair.
///
/// After the threshold is reached, attempts short-circuit until the
/// cool-down elapses; then a single probe call is admitted. A probe failure
/// reopens the circuit immediately, a success closes it.
pub struct CircuitBreaker {
    config: BreakerConfig,
    states: Mutex<HashMap<(String, String), BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn key(capability: &str, target: &TargetName) -> (String, String) {
        (capability.to_string(), target.as_str().to_string())
    }

    pub fn check(&self, capability: &str, target: &TargetName) -> Circuit {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&Self::key(capability, target)) else {
            return Circuit::Closed;
        };

        match state.opened_at {
            Some(opened_at) if opened_at.elapsed() >= self.config.cooldown => {
                // Half-open: admit one probe; one more failure reopens.
                state.opened_at = None;
                state.consecutive_failures = self.config.failure_threshold.saturating_sub(1);
                Circuit::Closed
            }
            Some(_) => Circuit::Open,
            None => Circuit::Closed,
        }
    }

    pub fn record_success(&self, capability: &str, target: &TargetName) {
        self.states.lock().remove(&Self::key(capability, target));
    }

    pub fn record_failure(&self, capability: &str, target: &TargetName) {
        let mut states = self.states.lock();
        let state = states.entry(Self::key(capability, target)).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.failure_threshold && state.opened_at.is_none()
        {
            tracing::warn!(
                capability,
                target = %target,
                failures = state.consecutive_failures,
                "circuit opened"
            );
            state.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            cooldown,
        })
    }

    fn target() -> TargetName {
        TargetName::new("api.example.com").unwrap()
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = breaker(3, Duration::from_secs(60));
        let target = target();

        for _ in 0..2 {
            breaker.record_failure("deploy_artifact", &target);
            assert_eq!(breaker.check("deploy_artifact", &target), Circuit::Closed);
        }
        breaker.record_failure("deploy_artifact", &target);
        assert_eq!(breaker.check("deploy_artifact", &target), Circuit::Open);
    }

    #[test]
    fn pairs_are_isolated() {
        let breaker = breaker(1, Duration::from_secs(60));
        let a = TargetName::new("a.example.com").unwrap();
        let b = TargetName::new("b.example.com").unwrap();

        breaker.record_failure("deploy_artifact", &a);
        assert_eq!(breaker.check("deploy_artifact", &a), Circuit::Open);
        assert_eq!(breaker.check("deploy_artifact", &b), Circuit::Closed);
        assert_eq!(breaker.check("verify_health", &a), Circuit::Closed);
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = breaker(2, Duration::from_secs(60));
        let target = target();

        breaker.record_failure("deploy_artifact", &target);
        breaker.record_success("deploy_artifact", &target);
        breaker.record_failure("deploy_artifact", &target);
        assert_eq!(breaker.check("deploy_artifact", &target), Circuit::Closed);
    }

    #[test]
    fn cooldown_admits_probe_then_failure_reopens() {
        let breaker = breaker(2, Duration::from_millis(10));
        let target = target();

        breaker.record_failure("deploy_artifact", &target);
        breaker.record_failure("deploy_artifact", &target);
        assert_eq!(breaker.check("deploy_artifact", &target), Circuit::Open);

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(breaker.check("deploy_artifact", &target), Circuit::Closed);

        breaker.record_failure("deploy_artifact", &target);
        assert_eq!(breaker.check("deploy_artifact", &target), Circuit::Open);
    }
}
