//! 会话摘要：把工作记忆中的对话滚动压缩成一段会话摘要

use crate::error::{MemoryError, Result, ValidationError};
use crate::llm::LlmClient;
use crate::llm::types::Message;
use crate::memory::working::Turn;
use async_trait::async_trait;
use std::sync::Arc;

const SUMMARY_INSTRUCTIONS: &str = "请把下面的对话压缩成一段简洁的会话摘要，供后续对话参考。
要求：
1. 保留用户明确表达的偏好、事实、计划和情绪变化
2. 保留尚未解决的问题
3. 如果提供了之前的摘要，把新内容合并进去，而不是另起一段
4. 只输出摘要正文，不超过 200 字";

/// 摘要提示词构建接口
pub trait SummaryPromptBuilder: Send + Sync {
    fn build(&self, previous_summary: Option<&str>, turns: &[Turn]) -> String;
}

pub struct DefaultSummaryPrompt;

impl SummaryPromptBuilder for DefaultSummaryPrompt {
    fn build(&self, previous_summary: Option<&str>, turns: &[Turn]) -> String {
        let history = turns
            .iter()
            .map(|t| format!("[{}]: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n");

        match previous_summary.filter(|s| !s.trim().is_empty()) {
            Some(previous) => format!(
                "{}\n\n之前的摘要：\n{}\n\n新的对话：\n{}",
                SUMMARY_INSTRUCTIONS, previous, history
            ),
            None => format!("{}\n\n对话：\n{}", SUMMARY_INSTRUCTIONS, history),
        }
    }
}

/// 用闭包自定义提示词
///
/// ```rust
/// use echo_memory::memory::FnSummaryPrompt;
///
/// let prompt = FnSummaryPrompt(|_prev: Option<&str>, turns: &[echo_memory::memory::Turn]| {
///     format!("用一句话总结这 {} 条消息", turns.len())
/// });
/// ```
pub struct FnSummaryPrompt<F>(pub F)
where
    F: Fn(Option<&str>, &[Turn]) -> String + Send + Sync;

impl<F> SummaryPromptBuilder for FnSummaryPrompt<F>
where
    F: Fn(Option<&str>, &[Turn]) -> String + Send + Sync,
{
    fn build(&self, previous_summary: Option<&str>, turns: &[Turn]) -> String {
        (self.0)(previous_summary, turns)
    }
}

#[async_trait]
pub trait ConversationSummarizer: Send + Sync {
    async fn summarize(&self, previous_summary: Option<&str>, turns: &[Turn]) -> Result<String>;
}

#[async_trait]
impl<T: ConversationSummarizer + ?Sized> ConversationSummarizer for Arc<T> {
    async fn summarize(&self, previous_summary: Option<&str>, turns: &[Turn]) -> Result<String> {
        (**self).summarize(previous_summary, turns).await
    }
}

pub struct LlmSummarizer<P: SummaryPromptBuilder = DefaultSummaryPrompt> {
    llm: Arc<dyn LlmClient>,
    prompt_builder: P,
}

impl LlmSummarizer<DefaultSummaryPrompt> {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            prompt_builder: DefaultSummaryPrompt,
        }
    }
}

impl<P: SummaryPromptBuilder> LlmSummarizer<P> {
    pub fn with_prompt(llm: Arc<dyn LlmClient>, prompt_builder: P) -> Self {
        Self {
            llm,
            prompt_builder,
        }
    }
}

#[async_trait]
impl<P: SummaryPromptBuilder + 'static> ConversationSummarizer for LlmSummarizer<P> {
    async fn summarize(&self, previous_summary: Option<&str>, turns: &[Turn]) -> Result<String> {
        if turns.is_empty() {
            return Err(MemoryError::Validation(ValidationError::InvalidArgument {
                name: "turns".to_string(),
                message: "nothing to summarize".to_string(),
            }));
        }
        let prompt = self.prompt_builder.build(previous_summary, turns);
        let summary = self.llm.chat_simple(vec![Message::user(prompt)]).await?;
        Ok(summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlmClient;

    fn turns() -> Vec<Turn> {
        vec![
            Turn::new("user", "我最近在学做手冲咖啡"),
            Turn::new("assistant", "听起来很有意思！"),
        ]
    }

    #[test]
    fn test_default_prompt_includes_previous_summary() {
        let prompt = DefaultSummaryPrompt.build(Some("用户喜欢咖啡"), &turns());
        assert!(prompt.contains("之前的摘要：\n用户喜欢咖啡"));
        assert!(prompt.contains("[user]: 我最近在学做手冲咖啡"));

        let prompt = DefaultSummaryPrompt.build(Some("  "), &turns());
        assert!(!prompt.contains("之前的摘要"));
    }

    #[tokio::test]
    async fn test_llm_summarizer_trims_output() {
        let llm = Arc::new(MockLlmClient::new().with_response("  用户在学手冲咖啡。\n"));
        let summarizer = LlmSummarizer::new(llm.clone());
        let summary = summarizer.summarize(None, &turns()).await.unwrap();
        assert_eq!(summary, "用户在学手冲咖啡。");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_custom_prompt() {
        let llm = Arc::new(MockLlmClient::new().with_response("ok"));
        let summarizer = LlmSummarizer::with_prompt(
            llm.clone(),
            FnSummaryPrompt(|_: Option<&str>, turns: &[Turn]| format!("count={}", turns.len())),
        );
        summarizer.summarize(None, &turns()).await.unwrap();
        assert_eq!(llm.last_messages().unwrap()[0].text(), "count=2");
    }

    #[tokio::test]
    async fn test_empty_turns_rejected_without_llm_call() {
        let llm = Arc::new(MockLlmClient::new());
        let summarizer = LlmSummarizer::new(llm.clone());
        let err = summarizer.summarize(None, &[]).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(llm.call_count(), 0);
    }
}
