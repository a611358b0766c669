use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use qa_error::{QaError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// 在 [0.5, 1.5) 区间内随机缩放每次等待时间
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            multiplier: 2.0,
            jitter: false,
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&QaError) -> bool + Send + Sync>;

/// 指数退避重试
#[derive(Clone)]
pub struct RetryPolicy {
    operation: String,
    config: RetryConfig,
    should_retry: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(operation: &str, config: RetryConfig) -> Self {
        Self {
            operation: operation.to_string(),
            config,
            should_retry: Arc::new(QaError::is_retryable),
        }
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&QaError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 第 n 次重试（从 0 开始）前的基础等待时间，不含抖动
    pub fn base_delay(&self, retry: u32) -> Duration {
        let initial = self.config.initial_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let factor = self.config.multiplier.max(1.0).powi(retry as i32);
        Duration::from_millis((initial * factor).min(max) as u64)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.config.jitter {
            return base;
        }
        let scale: f64 = rand::thread_rng().gen_range(0.5..1.5);
        let max = Duration::from_millis(self.config.max_delay_ms);
        base.mul_f64(scale).min(max)
    }

    /// 执行操作，失败且判定可重试时按退避等待后重试；取消信号会立即打断等待
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = %self.operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !(self.should_retry)(&err) {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    operation = %self.operation,
                    attempts = attempt,
                    error = %err,
                    "max retry attempts exceeded"
                );
                return Err(err);
            }

            let delay = self.delay(attempt - 1);
            warn!(
                operation = %self.operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "operation failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self) -> QaError {
        QaError::RetryCancelled {
            operation: self.operation.clone(),
        }
    }
}
