use crate::config::{MAX_TOP_K, MIN_TOP_K};
use crate::error::{MemoryError, Result};
use crate::llm::types::Message;
use crate::memory::judge::ImportanceJudge;
use crate::memory::types::{MemoryMetadata, StoreOutcome};
use crate::memory::vector_store::VectorStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_TOP_K: usize = 5;

/// 长期记忆的入口：判定重要性、写入去重、检索并格式化为提示词
///
/// 对话流程中调用的两个方法（[`extract_and_store_memories`](Self::extract_and_store_memories)、
/// [`get_relevant_memories`](Self::get_relevant_memories)）从不返回错误，
/// 依赖故障时只记录日志并降级。
pub struct MemoryManager {
    store: Arc<VectorStore>,
    judge: Arc<dyn ImportanceJudge>,
    top_k: usize,
}

impl MemoryManager {
    pub fn new(store: Arc<VectorStore>, judge: Arc<dyn ImportanceJudge>) -> Self {
        Self {
            store,
            judge,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// 检索条数，超出 1–20 时截断
    pub fn top_k(mut self, top_k: usize) -> Self {
        let clamped = top_k.clamp(MIN_TOP_K, MAX_TOP_K);
        if clamped != top_k {
            warn!(requested = top_k, used = clamped, "⚠️ top_k 超出范围，已截断");
        }
        self.top_k = clamped;
        self
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// 判定一条用户消息是否值得记住，值得则写入长期记忆
    pub async fn extract_and_store_memories(&self, message: &Message, session_id: Option<&str>) {
        if !message.is_user() {
            return;
        }
        let text = message.text().trim();
        if text.is_empty() {
            return;
        }

        let judgement = match self.judge.judge(text).await {
            Ok(judgement) => judgement,
            Err(e) => {
                warn!(session_id = ?session_id, error = %e, "⚠️ 重要性判定失败，本条消息不写入记忆");
                return;
            }
        };
        let Some(fact) = judgement.memory_text(text) else {
            debug!(session_id = ?session_id, "消息不重要，跳过");
            return;
        };

        match self.remember(&fact, session_id).await {
            Ok(StoreOutcome::Inserted(id)) => {
                info!(session_id = ?session_id, id = %id, fact = %fact, "🧠 新增长期记忆");
            }
            Ok(StoreOutcome::Updated(id)) => {
                info!(session_id = ?session_id, id = %id, fact = %fact, "🧠 更新已有记忆");
            }
            Ok(StoreOutcome::Skipped) => {
                debug!(session_id = ?session_id, "记忆写入被跳过");
            }
            Err(e) => {
                warn!(session_id = ?session_id, error = %e, "⚠️ 记忆写入失败");
            }
        }
    }

    /// 直接写入一条已经规整好的事实（不经过重要性判定），近似重复时复用原 ID
    pub async fn remember(&self, fact: &str, session_id: Option<&str>) -> Result<StoreOutcome> {
        if fact.trim().is_empty() {
            return Err(MemoryError::empty_text("fact"));
        }
        self.store
            .store_memory(fact, MemoryMetadata::fresh(), session_id)
            .await
    }

    /// 按相关度降序返回记忆文本；任何失败都返回空列表
    pub async fn get_relevant_memories(&self, context: &str, session_id: Option<&str>) -> Vec<String> {
        if context.trim().is_empty() {
            return Vec::new();
        }
        match self
            .store
            .search_memories(context, self.top_k, session_id)
            .await
        {
            Ok(memories) => memories.into_iter().map(|m| m.text).collect(),
            Err(e) => {
                warn!(session_id = ?session_id, error = %e, "⚠️ 记忆检索失败，按无记忆处理");
                Vec::new()
            }
        }
    }

    /// 每条记忆一行 `- ` 开头，无结尾换行；空列表返回空串
    pub fn format_memories_for_prompt<S: AsRef<str>>(memories: &[S]) -> String {
        memories
            .iter()
            .map(|m| format!("- {}", m.as_ref()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
