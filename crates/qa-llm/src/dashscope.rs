use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{http_client, EmbedModel, QaError, Result};

#[derive(Clone)]
pub struct QwenDashScopeConfig {
    pub api_key: String,
    pub model: String,   // e.g. text-embedding-v2 / v3
    pub api_url: String, // default https://dashscope.aliyuncs.com/compatible-mode/v1/embeddings
    pub dimensions: Option<usize>,
    pub timeout_secs: Option<u64>,
}

/// 只提供向量化；对话走 OpenAI 兼容或 Anthropic 客户端，因此没有流式生成
#[derive(Clone)]
pub struct QwenDashScopeClient {
    http: Client,
    cfg: QwenDashScopeConfig,
}

impl QwenDashScopeClient {
    pub fn new(cfg: QwenDashScopeConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(cfg.timeout_secs)?,
            cfg,
        })
    }
}

#[derive(Serialize)]
struct DashScopeEmbedReq<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct DashScopeEmbedVec {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct DashScopeEmbedResp {
    data: Vec<DashScopeEmbedVec>,
}

#[async_trait]
impl EmbedModel for QwenDashScopeClient {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = DashScopeEmbedReq {
            model: &self.cfg.model,
            input: texts,
            dimensions: self.cfg.dimensions,
        };
        let resp = self
            .http
            .post(&self.cfg.api_url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(QaError::EmbeddingService {
                provider: "dashscope".to_string(),
                message: format!("status={} body={}", status, txt),
                retry_after: None,
            });
        }
        let mut data: DashScopeEmbedResp = resp.json().await?;
        // 服务端不保证按输入顺序返回
        data.data.sort_by_key(|d| d.index);
        Ok(data.data.into_iter().map(|d| d.embedding).collect())
    }
}
