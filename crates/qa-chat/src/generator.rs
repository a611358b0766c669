use std::sync::Arc;

use qa_core::{Message, Role};
use qa_error::{QaError, Result};
use qa_llm::{ChatMessage, ChatModel, TextStream};
use qa_resilience::{CancellationToken, ResilientExecutor};

const DIRECT_SYSTEM_PROMPT: &str = r#"你是一个友好、专业的智能客服助手。你的任务是回答用户的问题，提供帮助和支持。

回答要求：
1. 语气友好、热情、专业
2. 回答简洁明了，重点突出
3. 对于简单的问候和闲聊，给予适当的回应
4. 对于不确定的问题，诚实告知并建议联系人工客服

注意事项：
- 不要编造信息
- 如果问题超出能力范围，建议用户联系人工客服
- 保护用户隐私，不要询问敏感信息"#;

pub const FALLBACK_MESSAGE: &str = "抱歉，我暂时无法回答您的问题。请联系人工客服获取帮助，或稍后重试。";

/// 人工转接提示，带上分类理由
pub fn handoff_message(reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("由于{}，正在为您转接人工客服，请稍候...", reason),
        None => "正在为您转接人工客服，请稍候...".to_string(),
    }
}

/// 将路由错误转换为面向用户的文本
pub fn error_message(err: &QaError) -> String {
    err.user_message()
}

/// 直接生成回答，以及多来源答案的合并
pub struct ResponseGenerator {
    chat: Arc<dyn ChatModel>,
    llm: ResilientExecutor,
}

impl ResponseGenerator {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            llm: ResilientExecutor::passthrough("response_llm"),
        }
    }

    pub fn with_executor(mut self, llm: ResilientExecutor) -> Self {
        self.llm = llm;
        self
    }

    /// 仅保留用户与助手消息，系统提示放在最前
    fn build_messages(history: &[Message]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(DIRECT_SYSTEM_PROMPT));
        messages.extend(
            history
                .iter()
                .filter(|m| m.role != Role::System)
                .map(ChatMessage::from),
        );
        messages
    }

    /// `history` 以当前用户消息结尾
    pub async fn generate(&self, history: &[Message], cancel: &CancellationToken) -> Result<String> {
        let messages = Self::build_messages(history);
        self.llm
            .execute(cancel, || self.chat.generate(&messages))
            .await
    }

    /// 建立流式输出；重试与熔断只作用于建立阶段
    pub async fn generate_stream(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<TextStream> {
        let messages = Self::build_messages(history);
        self.llm
            .execute(cancel, || self.chat.generate_stream(&messages))
            .await
    }

    /// 合并课程与订单两路答案
    pub async fn merge(
        &self,
        query: &str,
        course_answer: &str,
        order_answer: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "用户问题：{}\n\n课程信息：\n{}\n\n订单信息：\n{}\n\n请将上述信息整合成一个统一的回答。",
            query, course_answer, order_answer
        );
        let messages = vec![
            ChatMessage::system(DIRECT_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        self.llm
            .execute(cancel, || self.chat.generate(&messages))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use qa_llm::mock::ScriptedChatModel;

    #[test]
    fn test_canned_messages() {
        assert_eq!(
            handoff_message(Some("涉及投诉")),
            "由于涉及投诉，正在为您转接人工客服，请稍候..."
        );
        assert_eq!(handoff_message(Some("  ")), "正在为您转接人工客服，请稍候...");
        assert_eq!(handoff_message(None), "正在为您转接人工客服，请稍候...");
        let timeout = QaError::Timeout {
            operation: "llm".to_string(),
            timeout_ms: 1000,
        };
        assert_eq!(error_message(&timeout), "抱歉，系统响应超时，请稍后重试。");
    }

    #[tokio::test]
    async fn test_generate_passes_history() {
        let chat = Arc::new(ScriptedChatModel::fixed("Hi there!"));
        let generator = ResponseGenerator::new(chat.clone());
        let history = vec![
            Message::user("你好").unwrap(),
            Message::assistant("您好！").unwrap(),
            Message::system("内部备注").unwrap(),
            Message::user("hello").unwrap(),
        ];
        let answer = generator
            .generate(&history, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "Hi there!");

        let sent = &chat.calls()[0];
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[3].content, "hello");
    }

    #[tokio::test]
    async fn test_stream_yields_ordered_fragments() {
        let chat = Arc::new(ScriptedChatModel::fixed("流式回答内容").with_chunk_chars(2));
        let generator = ResponseGenerator::new(chat);
        let stream = generator
            .generate_stream(&[Message::user("hi").unwrap()], &CancellationToken::new())
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["流式", "回答", "内容"]);
    }

    #[tokio::test]
    async fn test_merge_prompt() {
        let chat = Arc::new(ScriptedChatModel::fixed("合并后的回答"));
        let generator = ResponseGenerator::new(chat.clone());
        let merged = generator
            .merge("课程和订单", "课程答案", "订单答案", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(merged, "合并后的回答");
        let prompt = &chat.calls()[0][1].content;
        assert!(prompt.contains("课程信息：\n课程答案"));
        assert!(prompt.contains("订单信息：\n订单答案"));
    }
}
