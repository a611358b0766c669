use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{http_client, sse, status_error, ChatMessage, ChatModel, Result, Role, TextStream};

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,   // e.g. claude-3-5-sonnet-latest
    pub api_url: String, // default https://api.anthropic.com
    pub max_tokens: u32,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    cfg: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(cfg: AnthropicConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(cfg.timeout_secs)?,
            cfg,
        })
    }
}

#[derive(Serialize)]
struct AnthMessageReqMsg<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthMessageReq<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthMessageReqMsg<'a>>,
    max_tokens: u32,
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct AnthMessageRespContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthMessageResp {
    content: Vec<AnthMessageRespContent>,
}

impl AnthropicClient {
    async fn post_messages(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        // system 消息单独放在顶层字段
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let body = AnthMessageReq {
            model: &self.cfg.model,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| AnthMessageReqMsg {
                    role: if m.role == Role::Assistant {
                        "assistant"
                    } else {
                        "user"
                    },
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.cfg.max_tokens,
            temperature: Some(0.2),
            stream,
        };

        let url = format!("{}/v1/messages", self.cfg.api_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(status_error("anthropic", status, txt));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    #[instrument(skip(self, messages))]
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let resp = self.post_messages(messages, false).await?;
        let data: AnthMessageResp = resp.json().await?;
        Ok(data.content.into_iter().filter_map(|c| c.text).collect())
    }

    /// content_block_delta 事件逐段输出
    #[instrument(skip(self, messages))]
    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let resp = self.post_messages(messages, true).await?;
        Ok(sse::anthropic_text_stream(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(stream: bool) -> serde_json::Value {
        let body = AnthMessageReq {
            model: "claude-3-5-sonnet-latest",
            system: None,
            messages: vec![AnthMessageReqMsg {
                role: "user",
                content: "你好",
            }],
            max_tokens: 256,
            temperature: Some(0.2),
            stream,
        };
        serde_json::to_value(&body).unwrap()
    }

    #[test]
    fn test_stream_flag_only_sent_when_streaming() {
        assert_eq!(request(true)["stream"], true);
        assert!(request(false).get("stream").is_none());
        assert!(request(false).get("system").is_none());
    }
}
