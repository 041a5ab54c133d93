//! 重要性判定：决定一条用户消息是否值得写入长期记忆

use crate::error::Result;
use crate::llm::LlmClient;
use crate::llm::types::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const JUDGE_PROMPT: &str = "你是一个记忆管理助手。判断用户的这条消息是否包含值得长期记住的个人信息，\
例如偏好、经历、身份、人际关系、计划或长期目标。寒暄、提问和一次性的请求不需要记住。

只输出一个 JSON 对象，不要输出其他内容：
{\"is_important\": true 或 false, \"formatted_memory\": \"以第三人称写成的一句简洁事实\" 或 null}

示例：
消息：我超爱喝咖啡，每天早上都要来一杯
输出：{\"is_important\": true, \"formatted_memory\": \"User loves coffee and drinks it every morning\"}

消息：今天天气怎么样？
输出：{\"is_important\": false, \"formatted_memory\": null}";

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub is_important: bool,
    /// 规整后的记忆文本；重要但为空时由调用方回退到原文
    pub formatted_memory: Option<String>,
}

impl Judgement {
    pub fn not_important() -> Self {
        Self {
            is_important: false,
            formatted_memory: None,
        }
    }

    pub fn important(formatted_memory: impl Into<String>) -> Self {
        Self {
            is_important: true,
            formatted_memory: Some(formatted_memory.into()),
        }
    }

    /// 需要写入的文本；不重要时为 `None`
    pub fn memory_text(&self, original: &str) -> Option<String> {
        if !self.is_important {
            return None;
        }
        let text = self
            .formatted_memory
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| original.trim());
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[async_trait]
pub trait ImportanceJudge: Send + Sync {
    async fn judge(&self, message: &str) -> Result<Judgement>;
}

#[async_trait]
impl<T: ImportanceJudge + ?Sized> ImportanceJudge for Arc<T> {
    async fn judge(&self, message: &str) -> Result<Judgement> {
        (**self).judge(message).await
    }
}

/// 让 LLM 输出 `{"is_important", "formatted_memory"}` JSON 的判定器
pub struct LlmImportanceJudge {
    llm: Arc<dyn LlmClient>,
}

impl LlmImportanceJudge {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ImportanceJudge for LlmImportanceJudge {
    async fn judge(&self, message: &str) -> Result<Judgement> {
        let messages = vec![Message::system(JUDGE_PROMPT), Message::user(message)];
        let raw = self.llm.chat_simple(messages).await?;
        let judgement = parse_judgement(&raw);
        debug!(
            is_important = judgement.is_important,
            formatted = ?judgement.formatted_memory,
            "🧐 重要性判定完成"
        );
        Ok(judgement)
    }
}

/// 解析模型输出；无法解析时一律视为不重要
pub(crate) fn parse_judgement(raw: &str) -> Judgement {
    let Some(value) = extract_json(raw) else {
        debug!(raw, "判定结果不是合法 JSON，按不重要处理");
        return Judgement::not_important();
    };

    let is_important = match value.get("is_important") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    };
    let formatted_memory = value
        .get("formatted_memory")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Judgement {
        is_important,
        formatted_memory,
    }
}

/// 去掉 Markdown 代码块围栏后取第一个 JSON 对象
fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced) {
        return Some(value);
    }
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&unfenced[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlmClient;

    #[test]
    fn test_parse_plain_json() {
        let j = parse_judgement(r#"{"is_important": true, "formatted_memory": "User loves coffee"}"#);
        assert_eq!(j, Judgement::important("User loves coffee"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"is_important\": false, \"formatted_memory\": null}\n```";
        assert_eq!(parse_judgement(raw), Judgement::not_important());

        let raw = "```\n{\"is_important\": true, \"formatted_memory\": \"User lives in Boston\"}\n```";
        assert_eq!(parse_judgement(raw), Judgement::important("User lives in Boston"));
    }

    #[test]
    fn test_parse_json_with_surrounding_text() {
        let raw = "好的，结果如下：{\"is_important\": \"true\", \"formatted_memory\": \"User has a cat\"} 。";
        assert_eq!(parse_judgement(raw), Judgement::important("User has a cat"));
    }

    #[test]
    fn test_unparseable_is_not_important() {
        assert_eq!(parse_judgement("我觉得很重要"), Judgement::not_important());
        assert_eq!(parse_judgement("[true]"), Judgement::not_important());
        assert_eq!(parse_judgement(""), Judgement::not_important());
    }

    #[test]
    fn test_memory_text_falls_back_to_original() {
        let j = Judgement {
            is_important: true,
            formatted_memory: None,
        };
        assert_eq!(j.memory_text("  I love coffee "), Some("I love coffee".to_string()));
        assert_eq!(Judgement::not_important().memory_text("I love coffee"), None);
        assert_eq!(
            Judgement::important("User loves coffee").memory_text("I love coffee"),
            Some("User loves coffee".to_string())
        );
    }

    #[tokio::test]
    async fn test_llm_judge_sends_message_as_user_turn() {
        let llm = Arc::new(MockLlmClient::new().with_response(
            r#"{"is_important": true, "formatted_memory": "User loves coffee"}"#,
        ));
        let judge = LlmImportanceJudge::new(llm.clone());

        let j = judge.judge("我超爱喝咖啡").await.unwrap();
        assert!(j.is_important);

        let sent = llm.last_messages().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, "system");
        assert!(sent[1].is_user());
        assert_eq!(sent[1].text(), "我超爱喝咖啡");
    }

    #[tokio::test]
    async fn test_llm_judge_propagates_service_errors() {
        let llm = Arc::new(MockLlmClient::new().with_network_error("timeout"));
        let judge = LlmImportanceJudge::new(llm);
        assert!(judge.judge("hi").await.unwrap_err().is_service_failure());
    }
}
