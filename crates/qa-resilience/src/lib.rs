//! 外部依赖调用的弹性封装：重试、熔断与降级。
//!
//! 组合顺序固定：重试在最内层，熔断器包住整次重试，降级在最外层。

mod breaker;
mod executor;
mod fallback;
mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use executor::{ResilienceConfig, ResilientExecutor};
pub use fallback::FallbackChain;
pub use retry::{RetryConfig, RetryPolicy};

pub use tokio_util::sync::CancellationToken;
