use std::path::Path;

use qa_chat::{ClassifierConfig, ParallelConfig, SessionConfig};
use qa_llm::{ChatProviderConfig, EmbedProviderConfig};
use qa_rag::RetrieverConfig;
use qa_resilience::ResilienceConfig;
use regex::Regex;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

const ENV_PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: ChatProviderConfig,
    pub embedding: EmbedProviderConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rag: RetrieverConfig,
    #[serde(default)]
    pub intent: ClassifierConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    /// 过期会话清理间隔
    pub sweep_interval_secs: u64,
    /// 启动时预先加载的租户
    pub preload_tenants: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "qa-worker".to_string(),
            sweep_interval_secs: 300,
            preload_tenants: vec!["default".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Memory,
    Qdrant,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackendKind,
    pub url: String,
    pub api_key: Option<String>,
    pub dimension: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Memory,
            url: "http://localhost:6334".to_string(),
            api_key: None,
            dimension: 1536,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub base_path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            base_path: "data/tenants".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 未设置 RUST_LOG 时使用的过滤规则
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 读取配置文件并展开 `${VAR}` 占位符，返回配置与缺失的环境变量名
pub fn load_config(path: &Path) -> anyhow::Result<(AppConfig, Vec<String>)> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
    let (expanded, missing) = expand_env(&raw, |key| std::env::var(key).ok())?;
    let cfg: AppConfig = serde_yaml::from_str(&expanded)?;
    Ok((cfg, missing))
}

/// 未定义的变量替换为空串
pub fn expand_env<F>(raw: &str, lookup: F) -> anyhow::Result<(String, Vec<String>)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let expanded = Regex::new(ENV_PLACEHOLDER)?
        .replace_all(raw, |caps: &regex::Captures| {
            let key = &caps[1];
            lookup(key).unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        })
        .into_owned();
    Ok((expanded, missing))
}
