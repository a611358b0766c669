use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

pub use qa_core::Role;
pub use qa_error::{QaError, Result};

mod anthropic;
mod dashscope;
mod factory;
pub mod mock;
mod openai;
mod sse;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use dashscope::{QwenDashScopeClient, QwenDashScopeConfig};
pub use factory::{make_providers, ChatProviderConfig, EmbedProviderConfig, Providers};
pub use openai::{OpenAiCompatClient, OpenAiCompatConfig};

/// 有序、有限的文本片段流，以正常结束或错误结束
pub type TextStream = BoxStream<'static, Result<String>>;

/// 发送给语言模型的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&qa_core::Message> for ChatMessage {
    fn from(message: &qa_core::Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// 默认实现：一次性生成后作为单个片段返回
    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let text = self.generate(messages).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }
}

#[async_trait]
pub trait EmbedModel: Send + Sync {
    /// 每个输入文本对应一个向量，顺序一致
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

fn status_error(provider: &str, status: reqwest::StatusCode, body: String) -> QaError {
    let retry_after = if status.as_u16() == 429 || status.is_server_error() {
        Some(std::time::Duration::from_secs(1))
    } else {
        None
    };
    QaError::LlmService {
        provider: provider.to_string(),
        message: format!("status={} body={}", status, body),
        retry_after,
    }
}

fn http_client(timeout_secs: Option<u64>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(std::time::Duration::from_secs(secs));
    }
    builder.build().map_err(|e| QaError::Configuration {
        key: "http_client".to_string(),
        reason: e.to_string(),
    })
}
