use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use qa_error::{QaError, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// 熔断器，状态由单个互斥锁保护，按依赖分别实例化后注入
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            max_failures: config.max_failures.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooled_down(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|at| at.elapsed() >= self.reset_timeout)
            .unwrap_or(true)
    }

    /// 当前状态；打开超过 reset_timeout 后报告为 HalfOpen
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.cooled_down(&inner) {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = %self.name, "circuit breaker half-open");
        }
        inner.state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn acquire(&self) -> Result<bool> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.cooled_down(&inner) {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = %self.name, "circuit breaker half-open");
        }
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(true)
            }
            _ => Err(QaError::CircuitOpen {
                service: self.name.clone(),
            }),
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(breaker = %self.name, "trial call failed, circuit breaker re-opened");
            }
            _ => {
                inner.failures += 1;
                if inner.failures >= self.max_failures && inner.state == CircuitState::Closed {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "circuit breaker opened"
                    );
                }
            }
        }
    }

    /// 熔断器打开时直接返回 `CircuitOpen`，不调用 op
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let trial = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        let result = op().await;
        guard.armed = false;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }
}

/// 试探调用被中途取消时释放试探名额，避免半开状态卡死
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}
