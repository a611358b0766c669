use std::sync::Arc;

use qa_core::Document;
use qa_error::{QaError, Result};
use qa_llm::{ChatMessage, ChatModel, EmbedModel};
use qa_resilience::{CancellationToken, ResilienceConfig, ResilientExecutor};
use qa_tenant::TenantManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::prompt::{build_context, build_user_prompt, GROUNDING_SYSTEM_PROMPT};

/// 检索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    /// 上下文最大字符数
    pub max_context_length: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.7,
            max_context_length: 8000,
        }
    }
}

/// 检索链路上三个外部依赖各自的弹性执行器
#[derive(Clone)]
pub struct RetrieverExecutors {
    pub embedding: ResilientExecutor,
    pub vector_search: ResilientExecutor,
    pub llm: ResilientExecutor,
}

impl RetrieverExecutors {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            embedding: ResilientExecutor::from_config("embedding", config),
            vector_search: ResilientExecutor::from_config("vector_search", config),
            llm: ResilientExecutor::from_config("llm", config),
        }
    }

    pub fn passthrough() -> Self {
        Self {
            embedding: ResilientExecutor::passthrough("embedding"),
            vector_search: ResilientExecutor::passthrough("vector_search"),
            llm: ResilientExecutor::passthrough("llm"),
        }
    }
}

/// 检索结果：答案与引用文档（按相似度降序）
#[derive(Debug, Clone)]
pub struct RetrievalAnswer {
    pub answer: String,
    pub sources: Vec<Document>,
}

/// 检索增强生成：向量化 → 检索 → 阈值过滤 → 基于上下文生成
pub struct Retriever {
    tenants: Arc<TenantManager>,
    embedder: Arc<dyn EmbedModel>,
    chat: Arc<dyn ChatModel>,
    config: RetrieverConfig,
    executors: RetrieverExecutors,
}

impl Retriever {
    pub fn new(
        tenants: Arc<TenantManager>,
        embedder: Arc<dyn EmbedModel>,
        chat: Arc<dyn ChatModel>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            tenants,
            embedder,
            chat,
            config,
            executors: RetrieverExecutors::passthrough(),
        }
    }

    pub fn with_executors(mut self, executors: RetrieverExecutors) -> Self {
        self.executors = executors;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// 没有文档达到阈值时返回 `NoRelevantDocuments`
    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id))]
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<RetrievalAnswer> {
        let sources = self.search(tenant_id, query, cancel).await?;

        let context = build_context(&sources, self.config.max_context_length);
        let messages = vec![
            ChatMessage::system(GROUNDING_SYSTEM_PROMPT),
            ChatMessage::user(build_user_prompt(query, &context)),
        ];
        let answer = self
            .executors
            .llm
            .execute(cancel, || self.chat.generate(&messages))
            .await?;

        info!(sources = sources.len(), "retrieval answer generated");
        Ok(RetrievalAnswer { answer, sources })
    }

    /// 检索并过滤文档，不调用生成
    pub async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let resources = self.tenants.resolve(tenant_id).await?;

        let texts = vec![query.to_string()];
        let vector = self
            .executors
            .embedding
            .execute(cancel, || self.embedder.embed(&texts))
            .await?
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| QaError::EmbeddingService {
                provider: "embedding".to_string(),
                message: "empty embedding result".to_string(),
                retry_after: None,
            })?;

        let top_k = self.config.top_k;
        let hits = self
            .executors
            .vector_search
            .execute(cancel, || resources.vectors.search(&vector, top_k))
            .await?;
        let total = hits.len();

        let mut kept: Vec<Document> = hits
            .into_iter()
            .filter(|d| d.score >= self.config.score_threshold)
            .collect();
        kept.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        debug!(total, kept = kept.len(), threshold = self.config.score_threshold, "filtered search hits");

        if kept.is_empty() {
            return Err(QaError::NoRelevantDocuments {
                query: query.to_string(),
            });
        }
        Ok(kept)
    }
}
