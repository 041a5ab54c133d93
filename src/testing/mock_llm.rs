//! Mock LLM 客户端，用于在不发起真实 HTTP 请求的情况下测试使用了 [`LlmClient`] 的组件。
//!
//! 典型用途：
//! - 测试 [`LlmImportanceJudge`](crate::memory::LlmImportanceJudge) 对各种模型输出的解析
//! - 测试 [`LlmSummarizer`](crate::memory::LlmSummarizer)
//! - 配合熔断器测试 LLM 故障时的降级路径
//!
//! # 示例
//!
//! ```rust
//! use echo_memory::memory::{ImportanceJudge, LlmImportanceJudge};
//! use echo_memory::testing::MockLlmClient;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = Arc::new(
//!     MockLlmClient::new()
//!         .with_judgement(Some("User loves coffee"))
//!         .with_unimportant()
//! );
//! let judge = LlmImportanceJudge::new(mock.clone());
//!
//! let first = judge.judge("我超爱喝咖啡").await.unwrap();
//! assert_eq!(first.memory_text("我超爱喝咖啡").as_deref(), Some("User loves coffee"));
//! assert!(!judge.judge("今天天气不错").await.unwrap().is_important);
//! assert_eq!(mock.last_user_text().as_deref(), Some("今天天气不错"));
//! # }
//! ```

use crate::error::{LlmError, MemoryError, Result};
use crate::llm::LlmClient;
use crate::llm::types::Message;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 预设响应的枚举（文本或错误）
enum MockLlmResponse {
    Content(String),
    Err(MemoryError),
}

/// 可脚本化的 Mock LLM 客户端。
///
/// 按顺序返回预设的响应；队列耗尽后返回 `EmptyResponse` 错误。
/// 所有调用都被记录，可通过 [`call_count`](MockLlmClient::call_count) /
/// [`last_messages`](MockLlmClient::last_messages) 等方法检查。
pub struct MockLlmClient {
    responses: Arc<Mutex<VecDeque<MockLlmResponse>>>,
    /// 每次调用时收到的 messages 列表，按顺序记录
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    /// 创建空 Mock，尚未设置任何响应
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 追加一条成功响应文本
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockLlmResponse::Content(text.into()));
        self
    }

    /// 批量追加多条成功响应
    pub fn with_responses(self, texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        {
            let mut q = self.responses.lock().unwrap();
            for t in texts {
                q.push_back(MockLlmResponse::Content(t.into()));
            }
        }
        self
    }

    /// 追加一条 "重要" 判定的 JSON 响应；`None` 表示模型没有给出规整后的文本
    pub fn with_judgement(self, formatted_memory: Option<&str>) -> Self {
        let body = json!({ "is_important": true, "formatted_memory": formatted_memory });
        self.with_response(body.to_string())
    }

    /// 追加一条 "不重要" 判定的 JSON 响应
    pub fn with_unimportant(self) -> Self {
        let body = json!({ "is_important": false, "formatted_memory": null });
        self.with_response(body.to_string())
    }

    /// 追加一条错误响应（用于测试错误处理路径）
    pub fn with_error(self, err: MemoryError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockLlmResponse::Err(err));
        self
    }

    /// 追加一条网络错误（常用的便捷方法）
    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(MemoryError::Llm(LlmError::NetworkError(msg.into())))
    }

    /// 已发生的调用总次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 最后一次调用时传入的 messages（若从未调用则返回 `None`）
    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// 最后一次调用中最后一条用户消息的文本（判定 / 摘要的输入）
    pub fn last_user_text(&self) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .last()?
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.text().to_string())
    }

    /// 剩余未消费的预设响应数量
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        // 记录本次调用
        self.calls.lock().unwrap().push(messages);

        // 返回下一个预设响应
        match self.responses.lock().unwrap().pop_front() {
            Some(MockLlmResponse::Content(text)) => Ok(text),
            Some(MockLlmResponse::Err(e)) => Err(e),
            None => Err(MemoryError::Llm(LlmError::EmptyResponse)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::judge::parse_judgement;

    #[tokio::test]
    async fn test_judgement_helpers_parse_as_judge_output() {
        let mock = MockLlmClient::new()
            .with_judgement(Some("User lives in Boston"))
            .with_judgement(None)
            .with_unimportant();

        let first = mock.chat_simple(vec![Message::user("我住在波士顿")]).await.unwrap();
        let first = parse_judgement(&first);
        assert!(first.is_important);
        assert_eq!(first.formatted_memory.as_deref(), Some("User lives in Boston"));

        let second = parse_judgement(&mock.chat_simple(vec![]).await.unwrap());
        assert_eq!(second.memory_text("I live in Boston").as_deref(), Some("I live in Boston"));

        let third = parse_judgement(&mock.chat_simple(vec![]).await.unwrap());
        assert!(!third.is_important);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_queue_and_last_user_text() {
        let mock = MockLlmClient::new();
        assert!(mock.last_user_text().is_none());

        let err = mock
            .chat_simple(vec![Message::system("判定"), Message::user("我养了一只猫")])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Llm(LlmError::EmptyResponse)));
        assert_eq!(mock.last_user_text().as_deref(), Some("我养了一只猫"));
        assert_eq!(mock.call_count(), 1);
    }
}
