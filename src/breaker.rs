use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{AppError, Result};
use crate::kv::{BoundedCounter, CounterOutcome, KvStore};

pub const LLM: &str = "llm";
pub const TELEGRAM: &str = "telegram";
pub const WHATSAPP_WEB: &str = "whatsapp_web";
pub const MAKE: &str = "make";

const STATE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_TRIAL_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    /// Unix millis of the last transition to open.
    pub opened_at_ms: Option<i64>,
}

/// Failure counter for one dependency. State lives in the shared store under `cb:<name>`
/// so every worker sees the same state; a local copy is used when the store fails.
///
/// Snapshot updates are read-modify-write, so two workers failing at the same instant may
/// count one failure. Only the half-open trial is claimed atomically (`cb:<name>:trial`).
pub struct CircuitBreaker {
    name: String,
    store: Arc<dyn KvStore>,
    local: Mutex<BreakerSnapshot>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(
        name: &str,
        store: Arc<dyn KvStore>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            store,
            local: Mutex::new(BreakerSnapshot::default()),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> String {
        format!("cb:{}", self.name)
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        match self.store.get(&self.key()).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(snapshot) => return snapshot,
                Err(e) => warn!(breaker = %self.name, error = %e, "unreadable breaker state"),
            },
            Ok(None) => return BreakerSnapshot::default(),
            Err(e) => warn!(breaker = %self.name, error = %e, "breaker store unavailable, using local state"),
        }
        *self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn save(&self, snapshot: BreakerSnapshot) {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        if let Err(e) = self.store.set_ex(&self.key(), &raw, STATE_TTL).await {
            warn!(breaker = %self.name, error = %e, "could not share breaker state");
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.snapshot().await.state
    }

    /// Runs `f` unless the breaker is open. An open breaker whose recovery timeout has elapsed
    /// lets one call through as half-open.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_call().await?;
        match f().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    fn trial_key(&self) -> String {
        format!("cb:{}:trial", self.name)
    }

    async fn before_call(&self) -> Result<()> {
        let mut snapshot = self.snapshot().await;
        let open_err = || AppError::CircuitOpen {
            service: self.name.clone(),
        };
        match snapshot.state {
            CircuitState::Closed => return Ok(()),
            CircuitState::Open => {
                let opened_at = snapshot.opened_at_ms.unwrap_or(0);
                let elapsed_ms = Utc::now().timestamp_millis() - opened_at;
                if elapsed_ms < self.recovery_timeout.as_millis() as i64 {
                    return Err(open_err());
                }
            }
            CircuitState::HalfOpen => {}
        }

        if !self.claim_trial().await {
            return Err(open_err());
        }
        if snapshot.state == CircuitState::Open {
            info!(breaker = %self.name, "circuit half-open, allowing trial call");
            snapshot.state = CircuitState::HalfOpen;
            self.save(snapshot).await;
        }
        Ok(())
    }

    /// One trial call at a time while half-open, across every worker sharing the store. The
    /// slot expires after the recovery timeout so a trial that never reports back does not
    /// wedge the breaker.
    async fn claim_trial(&self) -> bool {
        let slot = BoundedCounter {
            key: self.trial_key(),
            limit: 1,
            ttl: self.recovery_timeout.max(MIN_TRIAL_TTL),
        };
        match self.store.incr_if_below(&[slot]).await {
            Ok(CounterOutcome::Incremented) => true,
            Ok(CounterOutcome::Denied { .. }) => false,
            Err(e) => {
                warn!(breaker = %self.name, error = %e, "cannot claim trial slot, allowing call");
                true
            }
        }
    }

    async fn release_trial(&self) {
        if let Err(e) = self.store.delete(&self.trial_key()).await {
            warn!(breaker = %self.name, error = %e, "could not release trial slot");
        }
    }

    async fn record_success(&self) {
        let snapshot = self.snapshot().await;
        if snapshot.state != CircuitState::Closed || snapshot.failures > 0 {
            if snapshot.state != CircuitState::Closed {
                info!(breaker = %self.name, "circuit closed");
                self.release_trial().await;
            }
            self.save(BreakerSnapshot::default()).await;
        }
    }

    async fn record_failure(&self) {
        let mut snapshot = self.snapshot().await;
        let now = Utc::now().timestamp_millis();
        match snapshot.state {
            CircuitState::HalfOpen | CircuitState::Open => {
                snapshot.state = CircuitState::Open;
                snapshot.opened_at_ms = Some(now);
                self.release_trial().await;
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                snapshot.failures += 1;
                if snapshot.failures >= self.failure_threshold {
                    snapshot.state = CircuitState::Open;
                    snapshot.opened_at_ms = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = snapshot.failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
        }
        self.save(snapshot).await;
    }
}

/// One breaker per dependency name, created on first use.
pub struct BreakerRegistry {
    store: Arc<dyn KvStore>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(store: Arc<dyn KvStore>, config: &BreakerConfig) -> Self {
        Self {
            store,
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::try_from_secs_f64(config.recovery_timeout_secs)
                .unwrap_or(DEFAULT_RECOVERY_TIMEOUT),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.store.clone(),
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }
}
