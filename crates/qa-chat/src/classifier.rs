use std::sync::Arc;

use qa_core::{Intent, IntentType, Message};
use qa_error::{QaError, Result};
use qa_llm::{ChatMessage, ChatModel};
use qa_resilience::{CancellationToken, ResilientExecutor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::json::strip_code_fence;

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"你是一个智能客服意图识别助手。你的任务是分析用户的查询，判断用户的意图类型。

意图类型定义：
1. course - 课程咨询：用户询问课程内容、课程安排、学习资料等与课程相关的问题
2. order - 订单查询：用户查询订单状态、订单详情、退款等与订单相关的问题
3. direct - 直接回答：简单的问候、闲聊或可以直接回答的一般性问题
4. handoff - 人工转接：复杂问题、投诉、或需要人工处理的情况

请以 JSON 格式返回结果，包含以下字段：
{
  "intent": "意图类型（course/order/direct/handoff）",
  "confidence": 置信度分数（0-1之间的浮点数）,
  "reason": "判断理由"
}

注意：
- 只返回 JSON，不要包含其他文字
- confidence 必须是 0 到 1 之间的数字
- 如果不确定，将 confidence 设置为较低的值"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// 低于该置信度一律转人工
    pub confidence_threshold: f64,
    /// 参与判断的历史消息条数
    pub history_window: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            history_window: 6,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    intent: String,
    confidence: f64,
    #[serde(default)]
    reason: Option<String>,
}

/// 意图识别器
pub struct IntentClassifier {
    chat: Arc<dyn ChatModel>,
    config: ClassifierConfig,
    llm: ResilientExecutor,
}

impl IntentClassifier {
    pub fn new(chat: Arc<dyn ChatModel>, config: ClassifierConfig) -> Self {
        Self {
            chat,
            config,
            llm: ResilientExecutor::passthrough("intent_llm"),
        }
    }

    pub fn with_executor(mut self, llm: ResilientExecutor) -> Self {
        self.llm = llm;
        self
    }

    /// `history` 不含当前查询。输出无法解析时返回 `ClassificationFailed`
    #[instrument(skip(self, history, cancel), fields(history = history.len()))]
    pub async fn classify(
        &self,
        query: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Intent> {
        let messages = vec![
            ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT),
            ChatMessage::user(self.build_user_prompt(query, history)),
        ];
        let raw = self
            .llm
            .execute(cancel, || self.chat.generate(&messages))
            .await?;
        debug!(raw = %raw, "classifier output");

        let intent = self.interpret(&raw)?;
        info!(
            intent = %intent.kind,
            confidence = intent.confidence,
            "intent classified"
        );
        Ok(intent)
    }

    fn build_user_prompt(&self, query: &str, history: &[Message]) -> String {
        let mut prompt = String::new();
        let start = history.len().saturating_sub(self.config.history_window);
        let window = &history[start..];
        if !window.is_empty() {
            prompt.push_str("对话历史：\n");
            for message in window {
                prompt.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("当前用户查询：{}\n\n请分析用户意图并返回 JSON 结果。", query));
        prompt
    }

    /// 解析并按保守策略校正：未知标签、越界置信度、低置信度都转人工
    fn interpret(&self, raw: &str) -> Result<Intent> {
        let parsed: RawIntent =
            serde_json::from_str(strip_code_fence(raw)).map_err(|e| QaError::ClassificationFailed {
                reason: format!("unparseable classifier output: {}", e),
            })?;

        let mut intent = match IntentType::parse(&parsed.intent) {
            Some(kind) => Intent::new(kind, parsed.confidence),
            None => Intent::new(IntentType::Handoff, parsed.confidence)
                .with_meta("raw_intent", parsed.intent.as_str()),
        };
        if let Some(reason) = parsed.reason.filter(|r| !r.trim().is_empty()) {
            intent = intent.with_meta("reason", reason);
        }

        if !parsed.confidence.is_finite() || !(0.0..=1.0).contains(&parsed.confidence) {
            let raw_confidence = if parsed.confidence.is_finite() {
                parsed.confidence
            } else {
                -1.0
            };
            intent.kind = IntentType::Handoff;
            intent.confidence = 0.0;
            return Ok(intent.with_meta("raw_confidence", raw_confidence));
        }

        if !intent.is_confident(self.config.confidence_threshold) && intent.kind != IntentType::Handoff {
            let original = intent.kind;
            intent.kind = IntentType::Handoff;
            intent = intent.with_meta("original_intent", original.as_str());
        }
        Ok(intent)
    }
}
