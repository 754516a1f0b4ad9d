// ABOUTME: Test support utilities.
// ABOUTME: Provides scripted capabilities and config helpers for integration tests.

use async_trait::async_trait;
use nonempty::NonEmpty;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use stratus::capability::{
    Capability, CapabilityContext, CapabilityError, CapabilityRegistry, PhaseTable,
};
use stratus::config::{BackoffConfig, BreakerConfig, LockConfig, OrchestratorConfig, RetryConfig};
use stratus::types::{DeploymentId, Scope, TargetName};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("stratus=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Shared chronological event log across scripted capabilities.
pub type EventLog = Arc<Mutex<Vec<String>>>;

#[allow(dead_code)]
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[allow(dead_code)]
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}

/// How a scripted capability behaves for a matched target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Ok,
    /// Fail with retryable errors this many times, then succeed.
    FlakyTimes(u32),
    /// Always fail with retryable errors.
    AlwaysRetryable,
    /// Fail immediately with a fatal error.
    Fatal,
}

/// A scripted capability that records every call into a shared log.
pub struct ScriptedCapability {
    name: String,
    behavior: Behavior,
    /// Behavior applies only to this target; other targets succeed.
    only_target: Option<String>,
    compensation_fails: bool,
    execute_delay: Option<Duration>,
    log: EventLog,
    attempts: Mutex<HashMap<String, u32>>,
}

#[allow(dead_code)]
impl ScriptedCapability {
    pub fn ok(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self::build(name, Behavior::Ok, None, log))
    }

    pub fn flaky(name: &str, failures: u32, log: &EventLog) -> Arc<Self> {
        Arc::new(Self::build(name, Behavior::FlakyTimes(failures), None, log))
    }

    pub fn always_failing(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self::build(name, Behavior::AlwaysRetryable, None, log))
    }

    pub fn fatal(name: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self::build(name, Behavior::Fatal, None, log))
    }

    pub fn fatal_for(name: &str, target: &str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self::build(
            name,
            Behavior::Fatal,
            Some(target.to_string()),
            log,
        ))
    }

    pub fn with_failing_compensation(name: &str, behavior: Behavior, log: &EventLog) -> Arc<Self> {
        let mut cap = Self::build(name, behavior, None, log);
        cap.compensation_fails = true;
        Arc::new(cap)
    }

    pub fn slow(name: &str, delay: Duration, log: &EventLog) -> Arc<Self> {
        let mut cap = Self::build(name, Behavior::Ok, None, log);
        cap.execute_delay = Some(delay);
        Arc::new(cap)
    }

    fn build(name: &str, behavior: Behavior, only_target: Option<String>, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            only_target,
            compensation_fails: false,
            execute_delay: None,
            log: Arc::clone(log),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn applies_to(&self, target: &TargetName) -> bool {
        self.only_target
            .as_deref()
            .is_none_or(|only| only == target.as_str())
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        target: &TargetName,
        _ctx: &CapabilityContext,
    ) -> Result<(), CapabilityError> {
        self.log
            .lock()
            .push(format!("execute:{}:{}", self.name, target));

        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }

        if !self.applies_to(target) {
            return Ok(());
        }

        match self.behavior {
            Behavior::Ok => Ok(()),
            Behavior::FlakyTimes(failures) => {
                let mut attempts = self.attempts.lock();
                let count = attempts.entry(target.as_str().to_string()).or_insert(0);
                *count += 1;
                if *count <= failures {
                    Err(CapabilityError::Retryable(format!(
                        "transient failure {} of {}",
                        count, failures
                    )))
                } else {
                    Ok(())
                }
            }
            Behavior::AlwaysRetryable => {
                Err(CapabilityError::Retryable("persistent failure".to_string()))
            }
            Behavior::Fatal => Err(CapabilityError::Fatal("unrecoverable failure".to_string())),
        }
    }

    async fn compensate(
        &self,
        target: &TargetName,
        _ctx: &CapabilityContext,
    ) -> Result<(), CapabilityError> {
        self.log
            .lock()
            .push(format!("compensate:{}:{}", self.name, target));

        if self.compensation_fails {
            Err(CapabilityError::Fatal("compensation broken".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Registry with every capability any scope's table references, all
/// succeeding. Pass overrides to replace individual capabilities.
#[allow(dead_code)]
pub fn full_registry(log: &EventLog, overrides: Vec<Arc<ScriptedCapability>>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for name in PhaseTable::for_scope(Scope::Enterprise).capability_names() {
        registry.register(ScriptedCapability::ok(name, log));
    }
    for capability in overrides {
        registry.register(capability);
    }
    registry
}

/// Fast-running config for tests: millisecond backoff, short lock waits.
#[allow(dead_code)]
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryConfig {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(2),
        },
        backoff: BackoffConfig {
            initial: Duration::from_millis(1),
            multiplier: 2.0,
            max: Duration::from_millis(10),
            jitter: false,
        },
        breaker: BreakerConfig {
            failure_threshold: 10,
            cooldown: Duration::from_millis(50),
        },
        lock: LockConfig {
            wait_timeout: Duration::from_millis(500),
            ttl: Duration::from_secs(60),
        },
        parallelism: 4,
    }
}

#[allow(dead_code)]
pub fn deployment_id(value: &str) -> DeploymentId {
    DeploymentId::new(value.to_string())
}

#[allow(dead_code)]
pub fn target(value: &str) -> TargetName {
    TargetName::new(value).unwrap()
}

#[allow(dead_code)]
pub fn targets(values: &[&str]) -> NonEmpty<TargetName> {
    NonEmpty::from_vec(values.iter().map(|v| target(v)).collect())
        .expect("targets list must be nonempty")
}
