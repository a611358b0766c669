use std::future::Future;
use std::sync::Arc;

use qa_error::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
}

/// 组合处理器：重试 → 熔断 → 降级
#[derive(Clone)]
pub struct ResilientExecutor {
    name: String,
    retry: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl ResilientExecutor {
    pub fn new(name: &str, retry: RetryPolicy) -> Self {
        Self {
            name: name.to_string(),
            retry,
            breaker: None,
        }
    }

    /// 按配置创建，并为该依赖分配独立的熔断器
    pub fn from_config(name: &str, config: &ResilienceConfig) -> Self {
        Self::new(name, RetryPolicy::new(name, config.retry.clone()))
            .with_breaker(Arc::new(CircuitBreaker::new(name, &config.breaker)))
    }

    /// 不重试、不熔断，直接调用
    pub fn passthrough(name: &str) -> Self {
        let config = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        Self::new(name, RetryPolicy::new(name, config))
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.breaker {
            Some(breaker) => {
                breaker
                    .call(|| self.retry.execute(cancel, op))
                    .await
            }
            None => self.retry.execute(cancel, op).await,
        }
    }

    /// 主调用（含重试与熔断）失败后执行一次降级
    pub async fn execute_with_fallback<T, F, Fut, G, GFut>(
        &self,
        cancel: &CancellationToken,
        op: F,
        fallback: G,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        match self.execute(cancel, op).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(operation = %self.name, error = %err, "primary call failed, using fallback");
                fallback().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitState;
    use qa_error::QaError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn down() -> QaError {
        QaError::VectorStore {
            operation: "search".to_string(),
            message: "unreachable".to_string(),
        }
    }

    fn executor(max_failures: u32) -> ResilientExecutor {
        ResilientExecutor::from_config(
            "vector_search",
            &ResilienceConfig {
                retry: RetryConfig {
                    max_attempts: 2,
                    initial_delay_ms: 10,
                    ..RetryConfig::default()
                },
                breaker: CircuitBreakerConfig {
                    max_failures,
                    reset_timeout_ms: 60_000,
                },
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_counts_whole_retried_call() {
        let exec = executor(2);
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _ = exec
                .execute(&cancel, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(down()) }
                })
                .await;
        }
        // 两次调用各重试一次
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let breaker = exec.breaker().unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = exec
            .execute(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_runs_after_failure_and_open_circuit() {
        let exec = executor(1);
        let cancel = CancellationToken::new();
        let value = exec
            .execute_with_fallback(
                &cancel,
                || async { Err::<&str, _>(down()) },
                || async { Ok("fallback") },
            )
            .await
            .unwrap();
        assert_eq!(value, "fallback");

        let value = exec
            .execute_with_fallback(&cancel, || async { Ok("primary") }, || async { Ok("fallback") })
            .await
            .unwrap();
        assert_eq!(value, "fallback");
    }

    #[tokio::test]
    async fn test_passthrough_does_not_retry() {
        let exec = ResilientExecutor::passthrough("llm");
        let calls = AtomicUsize::new(0);
        let _ = exec
            .execute(&CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(down()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(exec.breaker().is_none());
    }
}
