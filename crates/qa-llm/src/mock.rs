//! 测试与本地开发用的模型替身

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{ChatMessage, ChatModel, EmbedModel, QaError, Result, TextStream};

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync>;

/// 按脚本应答的对话模型，并记录每次调用的消息
pub struct ScriptedChatModel {
    responder: Responder,
    delay: Option<Duration>,
    chunk_chars: usize,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChatModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            chunk_chars: 4,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 总是返回同一段文本
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// 依次返回给定结果，用尽后返回错误
    pub fn sequence(replies: Vec<Result<String>>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| Err(QaError::internal("scripted replies exhausted")))
        })
    }

    /// 总是失败
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| {
            Err(QaError::LlmService {
                provider: "mock".to_string(),
                message: message.clone(),
                retry_after: None,
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_chunk_chars(mut self, n: usize) -> Self {
        self.chunk_chars = n.max(1);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn respond(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(messages)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.respond(messages).await
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let text = self.respond(messages).await?;
        let chars: Vec<char> = text.chars().collect();
        let pieces: Vec<Result<String>> = chars
            .chunks(self.chunk_chars)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(futures::stream::iter(pieces).boxed())
    }
}

/// 对任意输入返回固定向量的嵌入模型
pub struct MockEmbedModel {
    vector: Vec<f32>,
    fail: bool,
    calls: Mutex<usize>,
}

impl MockEmbedModel {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            vector: Vec::new(),
            fail: true,
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockEmbedModel {
    fn default() -> Self {
        Self::new(vec![0.1, 0.2, 0.3, 0.4, 0.5])
    }
}

#[async_trait]
impl EmbedModel for MockEmbedModel {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.fail {
            return Err(QaError::EmbeddingService {
                provider: "mock".to_string(),
                message: "embedding unavailable".to_string(),
                retry_after: None,
            });
        }
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
}
