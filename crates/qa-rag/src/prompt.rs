use qa_core::Document;

pub(crate) const GROUNDING_SYSTEM_PROMPT: &str = r#"你是一个专业的课程咨询助手。你的任务是根据提供的知识库文档，准确回答用户关于课程的问题。

回答要求：
1. 只基于提供的文档内容回答，不要编造信息
2. 如果文档中没有相关信息，明确告知用户
3. 回答要清晰、准确、有条理
4. 使用友好、专业的语气

注意：
- 只回答与课程相关的问题
- 如果问题超出知识库范围，建议用户联系人工客服"#;

/// 按相似度顺序拼接文档，总长度不超过 `max_chars` 个字符
pub(crate) fn build_context(documents: &[Document], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;
    for (i, doc) in documents.iter().enumerate() {
        let block = format!(
            "文档 {} (相似度: {:.2}):\n{}\n\n",
            i + 1,
            doc.score,
            doc.content
        );
        let len = block.chars().count();
        if used + len > max_chars {
            // 至少保留第一篇文档的截断内容
            if i == 0 {
                context.extend(block.chars().take(max_chars));
            }
            break;
        }
        used += len;
        context.push_str(&block);
    }
    context
}

pub(crate) fn build_user_prompt(query: &str, context: &str) -> String {
    format!(
        "知识库文档：\n{}\n用户问题：{}\n\n请基于上述知识库文档回答用户问题。",
        context, query
    )
}
