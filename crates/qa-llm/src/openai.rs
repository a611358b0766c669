use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    http_client, sse, status_error, ChatMessage, ChatModel, EmbedModel, QaError, Result,
    TextStream,
};

// ========== OpenAI-compatible (covers OpenAI, DeepSeek, DashScope compatible-mode) ==========

#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,                // e.g. https://api.openai.com
    pub api_key: String,                 // Bearer token
    pub chat_model: String,              // e.g. gpt-4o, qwen-turbo
    pub embedding_model: Option<String>, // e.g. text-embedding-3-small
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: OpenAiCompatConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(cfg.timeout_secs)?,
            cfg,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    async fn post_chat(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let body = OaiChatReq {
            model: &self.cfg.chat_model,
            messages: messages
                .iter()
                .map(|m| OaiChatReqMsg {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.cfg.temperature,
            stream,
        };

        let resp = self
            .http
            .post(self.url("chat/completions"))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(status_error("openai_compat", status, txt));
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct OaiChatReqMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OaiChatReq<'a> {
    model: &'a str,
    messages: Vec<OaiChatReqMsg<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct OaiChatRespChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiChatRespChoice {
    message: OaiChatRespChoiceMsg,
}

#[derive(Deserialize)]
struct OaiChatResp {
    choices: Vec<OaiChatRespChoice>,
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    #[instrument(skip(self, messages), fields(model = %self.cfg.chat_model))]
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let resp = self.post_chat(messages, false).await?;
        let data: OaiChatResp = resp.json().await?;
        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| QaError::LlmService {
                provider: "openai_compat".to_string(),
                message: "empty choices".to_string(),
                retry_after: None,
            })
    }

    #[instrument(skip(self, messages), fields(model = %self.cfg.chat_model))]
    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let resp = self.post_chat(messages, true).await?;
        Ok(sse::openai_text_stream(resp))
    }
}

#[derive(Serialize)]
struct OaiEmbedReq<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OaiEmbedData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OaiEmbedResp {
    data: Vec<OaiEmbedData>,
}

#[async_trait]
impl EmbedModel for OpenAiCompatClient {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .cfg
            .embedding_model
            .as_deref()
            .ok_or_else(|| QaError::Configuration {
                key: "embedding_model".to_string(),
                reason: "not configured".to_string(),
            })?;
        let body = OaiEmbedReq {
            model,
            input: texts,
        };

        let resp = self
            .http
            .post(self.url("embeddings"))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(match status_error("openai_compat", status, txt) {
                QaError::LlmService {
                    provider,
                    message,
                    retry_after,
                } => QaError::EmbeddingService {
                    provider,
                    message,
                    retry_after,
                },
                other => other,
            });
        }

        let data: OaiEmbedResp = resp.json().await?;
        if data.data.len() != texts.len() {
            return Err(QaError::EmbeddingService {
                provider: "openai_compat".to_string(),
                message: format!("expected {} vectors, got {}", texts.len(), data.data.len()),
                retry_after: None,
            });
        }
        Ok(data.data.into_iter().map(|d| d.embedding).collect())
    }
}
