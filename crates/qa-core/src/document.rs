use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Metadata;

/// 检索得到的知识库文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// 相似度，越高越相关
    #[serde(default)]
    pub score: f32,
    pub tenant_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(tenant_id: &str, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            vector: None,
            score: 0.0,
            tenant_id: tenant_id.to_string(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}
