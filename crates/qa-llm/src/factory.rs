use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    AnthropicClient, AnthropicConfig, ChatModel, EmbedModel, OpenAiCompatClient,
    OpenAiCompatConfig, QwenDashScopeClient, QwenDashScopeConfig, Result,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChatProviderConfig {
    #[serde(rename = "openai_compat")]
    OpenAiCompat {
        base_url: String,
        api_key: String,
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    #[serde(rename = "anthropic")]
    Anthropic {
        api_url: Option<String>,
        api_key: String,
        model: String,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EmbedProviderConfig {
    #[serde(rename = "openai_compat")]
    OpenAiCompat {
        base_url: String,
        api_key: String,
        model: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    #[serde(rename = "qwen")]
    QwenDashScope {
        api_url: Option<String>,
        api_key: String,
        model: String,
        #[serde(default)]
        dimensions: Option<usize>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

pub struct Providers {
    pub chat: Arc<dyn ChatModel>,
    pub embed: Arc<dyn EmbedModel>,
}

pub fn make_providers(chat: ChatProviderConfig, embed: EmbedProviderConfig) -> Result<Providers> {
    let chat: Arc<dyn ChatModel> = match chat {
        ChatProviderConfig::OpenAiCompat {
            base_url,
            api_key,
            model,
            temperature,
            timeout_secs,
        } => Arc::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url,
            api_key,
            chat_model: model,
            embedding_model: None,
            temperature,
            timeout_secs,
        })?),
        ChatProviderConfig::Anthropic {
            api_url,
            api_key,
            model,
            max_tokens,
            timeout_secs,
        } => Arc::new(AnthropicClient::new(AnthropicConfig {
            api_url: api_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            api_key,
            model,
            max_tokens: max_tokens.unwrap_or(2048),
            timeout_secs,
        })?),
    };

    let embed: Arc<dyn EmbedModel> = match embed {
        EmbedProviderConfig::OpenAiCompat {
            base_url,
            api_key,
            model,
            timeout_secs,
        } => Arc::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url,
            api_key,
            chat_model: String::new(),
            embedding_model: Some(model),
            temperature: None,
            timeout_secs,
        })?),
        EmbedProviderConfig::QwenDashScope {
            api_url,
            api_key,
            model,
            dimensions,
            timeout_secs,
        } => Arc::new(QwenDashScopeClient::new(QwenDashScopeConfig {
            api_key,
            model,
            api_url: api_url.unwrap_or_else(|| {
                "https://dashscope.aliyuncs.com/compatible-mode/v1/embeddings".into()
            }),
            dimensions,
            timeout_secs,
        })?),
    };

    Ok(Providers { chat, embed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_from_yaml_shape() {
        let chat: ChatProviderConfig = serde_json::from_value(serde_json::json!({
            "kind": "openai_compat",
            "base_url": "https://dashscope.aliyuncs.com/compatible-mode",
            "api_key": "sk-test",
            "model": "qwen-turbo"
        }))
        .unwrap();
        let embed: EmbedProviderConfig = serde_json::from_value(serde_json::json!({
            "kind": "qwen",
            "api_key": "sk-test",
            "model": "text-embedding-v3",
            "dimensions": 1024
        }))
        .unwrap();
        assert!(make_providers(chat, embed).is_ok());
    }
}
