use crate::vector_db::{Payload, ScoredPoint};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// 记忆的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// 记忆 ID（UUID v4），在整个集合内唯一
    pub id: String,
    /// 写入时间（RFC 3339 / ISO-8601，UTC）
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MemoryMetadata {
    /// 生成新的 ID 与当前时间戳
    pub fn fresh() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// 复用已有 ID（去重更新），时间戳刷新为当前时间
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            session_id: None,
        }
    }

    pub fn session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }
}

/// 一条长期记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub text: String,
    pub metadata: MemoryMetadata,
    /// 相似度分数，仅检索结果携带
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Memory {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.metadata.session_id.as_deref()
    }

    /// 远程点的 payload：`{text, id, timestamp, session_id?}`
    pub(crate) fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("text".into(), json!(self.text));
        payload.insert("id".into(), json!(self.metadata.id));
        payload.insert("timestamp".into(), json!(self.metadata.timestamp));
        if let Some(session_id) = &self.metadata.session_id {
            payload.insert("session_id".into(), json!(session_id));
        }
        payload
    }

    /// 从检索结果还原；payload 缺少 `text` 时返回 None
    pub(crate) fn from_scored(point: ScoredPoint) -> Option<Self> {
        let get = |key: &str| point.payload.get(key).and_then(Value::as_str).map(str::to_string);
        let text = get("text")?;
        Some(Self {
            metadata: MemoryMetadata {
                id: get("id").unwrap_or_else(|| point.id.clone()),
                timestamp: get("timestamp").unwrap_or_default(),
                session_id: get("session_id"),
            },
            text,
            score: Some(point.score),
        })
    }
}

/// 一次写入的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// 新写入一条记忆
    Inserted(String),
    /// 命中近似重复，原 ID 被复用并原地更新
    Updated(String),
    /// 依赖熔断，写入被丢弃
    Skipped,
}

impl StoreOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            StoreOutcome::Inserted(id) | StoreOutcome::Updated(id) => Some(id),
            StoreOutcome::Skipped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metadata_has_uuid_and_rfc3339_timestamp() {
        let meta = MemoryMetadata::fresh().session(Some("alice"));
        assert!(uuid::Uuid::parse_str(&meta.id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&meta.timestamp).is_ok());
        assert_eq!(meta.session_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_payload_roundtrip_through_scored_point() {
        let memory = Memory {
            text: "User loves coffee".to_string(),
            metadata: MemoryMetadata::with_id("m-1"),
            score: None,
        };
        let payload = memory.to_payload();
        assert!(!payload.contains_key("session_id"));

        let restored = Memory::from_scored(ScoredPoint {
            id: "m-1".to_string(),
            score: 0.97,
            payload,
        })
        .unwrap();
        assert_eq!(restored.text, memory.text);
        assert_eq!(restored.id(), "m-1");
        assert_eq!(restored.score, Some(0.97));
        assert_eq!(restored.session_id(), None);
    }

    #[test]
    fn test_point_without_text_is_dropped() {
        let point = ScoredPoint {
            id: "x".to_string(),
            score: 0.5,
            payload: Payload::new(),
        };
        assert!(Memory::from_scored(point).is_none());
    }
}
