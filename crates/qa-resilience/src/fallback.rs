use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use qa_error::{QaError, Result};
use tracing::{debug, warn};

type BoxedOp<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct FallbackEntry<T> {
    name: String,
    primary: BoxedOp<T>,
    fallback: Option<BoxedOp<T>>,
}

/// 有序降级链：依次尝试每一对 (primary, fallback)，首个成功即返回
pub struct FallbackChain<T> {
    entries: Vec<FallbackEntry<T>>,
}

impl<T: Send + 'static> Default for FallbackChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> FallbackChain<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add<P, PF>(mut self, name: &str, primary: P) -> Self
    where
        P: Fn() -> PF + Send + Sync + 'static,
        PF: Future<Output = Result<T>> + Send + 'static,
    {
        self.entries.push(FallbackEntry {
            name: name.to_string(),
            primary: Box::new(move || primary().boxed()),
            fallback: None,
        });
        self
    }

    pub fn add_with_fallback<P, PF, B, BF>(mut self, name: &str, primary: P, fallback: B) -> Self
    where
        P: Fn() -> PF + Send + Sync + 'static,
        PF: Future<Output = Result<T>> + Send + 'static,
        B: Fn() -> BF + Send + Sync + 'static,
        BF: Future<Output = Result<T>> + Send + 'static,
    {
        self.entries.push(FallbackEntry {
            name: name.to_string(),
            primary: Box::new(move || primary().boxed()),
            fallback: Some(Box::new(move || fallback().boxed())),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn execute(&self) -> Result<T> {
        for entry in &self.entries {
            match (entry.primary)().await {
                Ok(value) => {
                    debug!(handler = %entry.name, "primary handler succeeded");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(handler = %entry.name, error = %err, "primary handler failed");
                }
            }
            if let Some(fallback) = &entry.fallback {
                match fallback().await {
                    Ok(value) => {
                        debug!(handler = %entry.name, "fallback handler succeeded");
                        return Ok(value);
                    }
                    Err(err) => {
                        warn!(handler = %entry.name, error = %err, "fallback handler failed");
                    }
                }
            }
        }
        Err(QaError::FallbackExhausted {
            attempts: self.entries.len(),
        })
    }
}
