//! 记忆子系统配置
//!
//! YAML 文件 + 环境变量覆盖，所有字段都有默认值：
//!
//! ```yaml
//! vector_db:
//!   url: http://localhost:6333
//!   collection: user_memories
//! embedding:
//!   model: text-embedding-3-small
//!   baseurl: https://api.openai.com/v1/embeddings
//! judge_model: qwen3-max
//! retrieval:
//!   top_k: 5
//!   similarity_threshold: 0.9
//!   session_isolation: true
//! breakers:
//!   vector_db: { failure_threshold: 5, recovery_timeout_secs: 60 }
//! ```

use crate::error::{ConfigError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 20;
/// 熔断恢复等待的上限（一天）
pub const MAX_RECOVERY_TIMEOUT_SECS: f64 = 24.0 * 60.0 * 60.0;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct VectorDbConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "user_memories".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// `/embeddings` 接口完整 URL
    pub baseurl: String,
    pub apikey: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            baseurl: "https://api.openai.com/v1/embeddings".to_string(),
            apikey: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 每次检索返回的记忆条数（1–20）
    pub top_k: usize,
    /// 去重阈值：相似度不低于此值视为同一条记忆
    pub similarity_threshold: f32,
    /// 按会话隔离检索范围
    pub session_isolation: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.9,
            session_isolation: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HierarchyConfig {
    /// 工作记忆保留的轮数 N（容量为 2N 条消息）
    pub working_memory_turns: usize,
    /// 累计多少轮后需要做一次会话摘要
    pub summarize_after_turns: u32,
    /// 上下文窗口中单条消息的预览长度（字符）
    pub preview_chars: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            working_memory_turns: 5,
            summarize_after_turns: 10,
            preview_chars: 200,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
        }
    }
}

impl BreakerConfig {
    /// 非有限值或超出 `Duration` 表示范围时返回配置错误
    pub fn recovery_timeout(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.recovery_timeout_secs).map_err(|e| {
            invalid(
                "recovery_timeout_secs",
                &format!("cannot convert {} seconds: {}", self.recovery_timeout_secs, e),
            )
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct BreakersConfig {
    pub llm: BreakerConfig,
    pub embedding: BreakerConfig,
    pub vector_db: BreakerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// 会话空闲多久后被回收
    pub idle_timeout_secs: u64,
    /// 回收任务的执行间隔
    pub reap_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            reap_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// 记忆子系统总配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub vector_db: VectorDbConfig,
    pub embedding: EmbeddingConfig,
    /// 重要性判定 / 摘要使用的模型名（对应 `AGENT_MODEL_*` 中的 model 字段）
    pub judge_model: String,
    pub retrieval: RetrievalConfig,
    pub hierarchy: HierarchyConfig,
    pub breakers: BreakersConfig,
    pub sessions: SessionConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_db: VectorDbConfig::default(),
            embedding: EmbeddingConfig::default(),
            judge_model: "qwen3-max".to_string(),
            retrieval: RetrievalConfig::default(),
            hierarchy: HierarchyConfig::default(),
            breakers: BreakersConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl MemoryConfig {
    pub fn load(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: MemoryConfig = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// 读取 `.env` 与 `ECHO_MEMORY_*` 环境变量覆盖对应字段
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        dotenv().ok();
        self.apply_vars(std::env::vars())?;
        Ok(self)
    }

    fn apply_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                "ECHO_MEMORY_QDRANT_URL" => self.vector_db.url = value,
                "ECHO_MEMORY_QDRANT_API_KEY" => self.vector_db.api_key = Some(value),
                "ECHO_MEMORY_COLLECTION" => self.vector_db.collection = value,
                "ECHO_MEMORY_EMBEDDING_MODEL" => self.embedding.model = value,
                "ECHO_MEMORY_EMBEDDING_BASEURL" => self.embedding.baseurl = value,
                "ECHO_MEMORY_EMBEDDING_APIKEY" => self.embedding.apikey = value,
                "ECHO_MEMORY_JUDGE_MODEL" => self.judge_model = value,
                "ECHO_MEMORY_TOP_K" => self.retrieval.top_k = parse_var(&key, &value)?,
                "ECHO_MEMORY_SIMILARITY_THRESHOLD" => {
                    self.retrieval.similarity_threshold = parse_var(&key, &value)?
                }
                "ECHO_MEMORY_SESSION_ISOLATION" => {
                    self.retrieval.session_isolation = parse_var(&key, &value)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 校验并规整配置：`top_k` 超出 1–20 时截断并告警，其余非法值直接报错
    pub fn validate(mut self) -> Result<Self> {
        let clamped = self.retrieval.top_k.clamp(MIN_TOP_K, MAX_TOP_K);
        if clamped != self.retrieval.top_k {
            warn!(
                requested = self.retrieval.top_k,
                used = clamped,
                "⚠️ top_k 超出范围，已截断"
            );
            self.retrieval.top_k = clamped;
        }

        let threshold = self.retrieval.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(invalid("retrieval.similarity_threshold", "must be in (0, 1]"));
        }
        if self.hierarchy.working_memory_turns == 0 {
            return Err(invalid("hierarchy.working_memory_turns", "must be greater than 0"));
        }
        if self.hierarchy.summarize_after_turns == 0 {
            return Err(invalid("hierarchy.summarize_after_turns", "must be greater than 0"));
        }
        for (name, breaker) in [
            ("breakers.llm", &self.breakers.llm),
            ("breakers.embedding", &self.breakers.embedding),
            ("breakers.vector_db", &self.breakers.vector_db),
        ] {
            if breaker.failure_threshold == 0 {
                return Err(invalid(name, "failure_threshold must be greater than 0"));
            }
            let timeout = breaker.recovery_timeout_secs;
            if !(timeout > 0.0 && timeout <= MAX_RECOVERY_TIMEOUT_SECS) {
                return Err(invalid(
                    name,
                    &format!(
                        "recovery_timeout_secs must be in (0, {}]",
                        MAX_RECOVERY_TIMEOUT_SECS
                    ),
                ));
            }
        }
        if self.vector_db.collection.trim().is_empty() {
            return Err(invalid("vector_db.collection", "must not be empty"));
        }
        Ok(self)
    }
}

fn invalid(field: &str, message: &str) -> crate::error::MemoryError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            message: format!("cannot parse '{}'", value),
        }
        .into()
    })
}
