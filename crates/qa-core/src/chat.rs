use chrono::{DateTime, Utc};
use qa_error::{QaError, Result};
use serde::{Deserialize, Serialize};

use crate::{Document, IntentType};

/// 单轮对话请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub tenant_id: String,
    /// 为空时创建新会话
    #[serde(default)]
    pub session_id: String,
}

impl ChatRequest {
    pub fn new(tenant_id: &str, query: &str) -> Self {
        Self {
            query: query.to_string(),
            tenant_id: tenant_id.to_string(),
            session_id: String::new(),
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(QaError::validation("query is required"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(QaError::validation("tenant_id is required"));
        }
        Ok(())
    }
}

/// 单轮元数据，同步结果与流式终止块共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub route: IntentType,
    pub confidence: f64,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 单轮对话结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurnResult {
    pub answer: String,
    pub route: IntentType,
    #[serde(default)]
    pub sources: Vec<Document>,
    pub session_id: String,
    pub metadata: TurnMetadata,
}

/// 流式输出块；`Done` 总是最后一个且只出现一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content {
        content: String,
    },
    Error {
        message: String,
    },
    Done {
        session_id: String,
        metadata: Option<TurnMetadata>,
        #[serde(default)]
        sources: Vec<Document>,
    },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done { .. })
    }
}

/// 未命中知识库的查询记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedQuery {
    pub id: i64,
    pub query: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(ChatRequest::new("t1", "hello").validate().is_ok());
        assert!(matches!(
            ChatRequest::new("t1", "  ").validate(),
            Err(QaError::Validation { .. })
        ));
        assert!(matches!(
            ChatRequest::new("", "hello").validate(),
            Err(QaError::Validation { .. })
        ));
    }

    #[test]
    fn test_chunk_wire_shape() {
        let chunk = StreamChunk::Content {
            content: "Hi".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "content");
        assert!(!chunk.is_terminal());

        let done = StreamChunk::Done {
            session_id: "sess_1".to_string(),
            metadata: None,
            sources: vec![],
        };
        assert!(done.is_terminal());
    }
}
