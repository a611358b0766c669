use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum QaError {
    // === 业务错误 ===
    #[error("验证失败: {message}")]
    Validation { message: String },

    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    #[error("会话已过期: {session_id}")]
    SessionExpired { session_id: String },

    #[error("意图识别失败: {reason}")]
    ClassificationFailed { reason: String },

    #[error("未检索到相关文档: {query}")]
    NoRelevantDocuments { query: String },

    #[error("查询语句未通过安全校验: {reason}")]
    UnsafeQueryRejected { reason: String },

    #[error("资源冲突: {details}")]
    Conflict { details: String },

    // === 外部服务错误 ===
    #[error("数据库错误: {operation}")]
    Database { operation: String, message: String },

    #[error("向量存储错误: {operation} 失败")]
    VectorStore { operation: String, message: String },

    #[error("LLM 服务错误 ({provider})")]
    LlmService {
        provider: String,
        message: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    #[error("嵌入服务错误 ({provider})")]
    EmbeddingService {
        provider: String,
        message: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    #[error("外部服务不可用: {service}")]
    ServiceUnavailable {
        service: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    #[error("网络错误: {operation}")]
    Network { operation: String, message: String },

    #[error("超时错误: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // === 弹性控制 ===
    #[error("熔断器已打开: {service}")]
    CircuitOpen { service: String },

    #[error("重试已取消: {operation}")]
    RetryCancelled { operation: String },

    #[error("所有降级处理均失败 (共 {attempts} 个)")]
    FallbackExhausted { attempts: usize },

    // === 系统错误 ===
    #[error("内部系统错误: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },

    #[error("配置错误: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },

    #[error("并发错误: {operation}")]
    Concurrency { operation: String, message: String },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的业务错误
    Medium,   // 外部依赖失败，可降级
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub tenant_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl QaError {
    pub fn validation(message: impl Into<String>) -> Self {
        QaError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        QaError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QaError::Internal {
            message: message.into(),
            details: None,
        }
    }

    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            QaError::Validation { .. }
            | QaError::NotFound { .. }
            | QaError::SessionExpired { .. }
            | QaError::NoRelevantDocuments { .. }
            | QaError::RetryCancelled { .. } => ErrorSeverity::Low,
            QaError::ClassificationFailed { .. }
            | QaError::Conflict { .. }
            | QaError::CircuitOpen { .. }
            | QaError::LlmService { .. }
            | QaError::EmbeddingService { .. }
            | QaError::ServiceUnavailable { .. }
            | QaError::Network { .. }
            | QaError::Timeout { .. } => ErrorSeverity::Medium,
            QaError::UnsafeQueryRejected { .. }
            | QaError::Database { .. }
            | QaError::VectorStore { .. }
            | QaError::FallbackExhausted { .. }
            | QaError::Serialization { .. }
            | QaError::Concurrency { .. } => ErrorSeverity::High,
            QaError::Internal { .. } | QaError::Configuration { .. } => ErrorSeverity::Critical,
        }
    }

    /// 是否为外部依赖调用失败
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            QaError::Database { .. }
                | QaError::VectorStore { .. }
                | QaError::LlmService { .. }
                | QaError::EmbeddingService { .. }
                | QaError::ServiceUnavailable { .. }
                | QaError::Network { .. }
                | QaError::Timeout { .. }
        )
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            QaError::Network { .. } | QaError::Timeout { .. } => true,
            QaError::ServiceUnavailable { .. } => true,
            QaError::LlmService { .. }
            | QaError::EmbeddingService { .. }
            | QaError::VectorStore { .. } => true,
            QaError::Concurrency { .. } => true,
            _ => false,
        }
    }

    /// 获取重试延迟时间
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            QaError::ServiceUnavailable { retry_after, .. }
            | QaError::LlmService { retry_after, .. }
            | QaError::EmbeddingService { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// 按严重级别输出一条结构化日志：低、中级用 warn，高级及以上用 error
    pub fn log(&self, metadata: &ErrorMetadata) {
        let operation = metadata.operation.as_deref().unwrap_or("-");
        let tenant_id = metadata.tenant_id.as_deref().unwrap_or("-");
        let session_id = metadata.session_id.as_deref().unwrap_or("-");
        if metadata.severity >= ErrorSeverity::High {
            error!(
                error_id = %metadata.error_id,
                component = %metadata.component,
                operation,
                tenant_id,
                session_id,
                severity = ?metadata.severity,
                context = ?metadata.context,
                error = %self,
                "operation failed"
            );
        } else {
            warn!(
                error_id = %metadata.error_id,
                component = %metadata.component,
                operation,
                tenant_id,
                session_id,
                severity = ?metadata.severity,
                external = self.is_external(),
                error = %self,
                "operation degraded"
            );
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            QaError::Timeout { .. } => "抱歉，系统响应超时，请稍后重试。".to_string(),
            QaError::NotFound { .. } | QaError::NoRelevantDocuments { .. } => {
                "抱歉，未找到相关信息。".to_string()
            }
            QaError::Network { .. } => "抱歉，网络连接出现问题，请稍后重试。".to_string(),
            QaError::Validation { .. } => "输入数据验证失败，请检查格式".to_string(),
            _ => "抱歉，系统遇到了一些问题，请稍后重试或联系人工客服。".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                tenant_id: None,
                session_id: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn tenant_id(mut self, tenant_id: &str) -> Self {
        self.metadata.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn session_id(mut self, session_id: &str) -> Self {
        self.metadata.session_id = Some(session_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &QaError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, QaError>;

impl From<serde_json::Error> for QaError {
    fn from(err: serde_json::Error) -> Self {
        QaError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

/// 底层错误不带具体超时时长，按客户端默认值记录
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

impl From<reqwest::Error> for QaError {
    fn from(err: reqwest::Error) -> Self {
        let operation = if err.is_connect() { "connect" } else { "http_request" };
        match err.status() {
            _ if err.is_timeout() => QaError::Timeout {
                operation: operation.to_string(),
                timeout_ms: DEFAULT_TIMEOUT_MS,
            },
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                QaError::ServiceUnavailable {
                    service: err
                        .url()
                        .and_then(|u| u.host_str())
                        .unwrap_or("http")
                        .to_string(),
                    retry_after: None,
                }
            }
            _ => QaError::Network {
                operation: operation.to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl From<sqlx::Error> for QaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => QaError::NotFound {
                resource: "row".to_string(),
            },
            sqlx::Error::PoolTimedOut => QaError::Timeout {
                operation: "db_acquire".to_string(),
                timeout_ms: DEFAULT_TIMEOUT_MS,
            },
            other => QaError::Database {
                operation: "sqlx".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<sqlx::migrate::MigrateError> for QaError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        QaError::Database {
            operation: "migrate".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<uuid::Error> for QaError {
    fn from(err: uuid::Error) -> Self {
        QaError::Serialization {
            format: "uuid".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for QaError {
    fn from(err: tokio::task::JoinError) -> Self {
        QaError::Concurrency {
            operation: "task_join".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<qdrant_client::QdrantError> for QaError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        QaError::VectorStore {
            operation: "qdrant_client".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for QaError {
    fn from(err: anyhow::Error) -> Self {
        QaError::Internal {
            message: err.to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_errors_are_retryable() {
        let err = QaError::LlmService {
            provider: "mock".to_string(),
            message: "502".to_string(),
            retry_after: None,
        };
        assert!(err.is_external());
        assert!(err.is_retryable());

        let err = QaError::validation("empty query");
        assert!(!err.is_external());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_circuit_open_fails_fast() {
        let err = QaError::CircuitOpen {
            service: "llm".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_user_message_mapping() {
        let timeout = QaError::Timeout {
            operation: "search".to_string(),
            timeout_ms: 100,
        };
        assert!(timeout.user_message().contains("超时"));
        assert!(QaError::not_found("order")
            .user_message()
            .contains("未找到"));
        let network = QaError::Network {
            operation: "connect".to_string(),
            message: "refused".to_string(),
        };
        assert!(network.user_message().contains("网络"));
        assert!(QaError::internal("boom").user_message().contains("人工客服"));
    }

    #[test]
    fn test_metadata_builder_takes_error_severity() {
        let err = QaError::UnsafeQueryRejected {
            reason: "DROP".to_string(),
        };
        let meta = ErrorMetadataBuilder::new("store")
            .operation("find_order")
            .tenant_id("t1")
            .context("sql", "DROP TABLE orders")
            .build(&err);
        assert_eq!(meta.severity, ErrorSeverity::High);
        assert_eq!(meta.tenant_id.as_deref(), Some("t1"));
    }
}
