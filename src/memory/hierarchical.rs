//! 三层记忆的会话门面
//!
//! | 层次 | 类型 | 生命周期 |
//! |------|------|----------|
//! | 工作记忆 | [`WorkingMemory`] | 最近 N 轮 |
//! | 会话记忆 | [`SessionMemory`] | 单个会话 |
//! | 长期记忆 | [`MemoryManager`] | 跨会话，向量库持久化 |
//!
//! 三层互不调用，只由本门面组合。

use crate::config::HierarchyConfig;
use crate::llm::types::Message;
use crate::memory::manager::MemoryManager;
use crate::memory::session::{SessionMemory, SessionView};
use crate::memory::summarizer::ConversationSummarizer;
use crate::memory::working::{Turn, WorkingMemory};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 构造长期记忆检索词时使用的最近消息条数
const QUERY_TURNS: usize = 3;

/// 判定冲突所需的最少共享词数
///
/// 「I don't like coffee anymore」与「User loves coffee」去掉填充词后只共享 `coffee`，
/// 这一对必须判为冲突，所以下限只能是 1。误报由否定词条件和 [`FILLER_WORDS`] 共同压住：
/// 填充词表漏掉的常见词会直接变成冲突来源。
const MIN_SHARED_WORDS: usize = 1;

/// 不参与重叠计数的词（代词、系动词、虚词以及 like / anymore 这类语气词）
const FILLER_WORDS: &[&str] = &[
    "user", "i", "i'm", "im", "me", "my", "mine", "the", "a", "an", "in", "on", "at", "to", "of",
    "for", "with", "and", "or", "but", "is", "am", "are", "was", "were", "be", "been", "it",
    "it's", "this", "that", "these", "those", "so", "very", "really", "too", "also", "just",
    "do", "does", "did", "have", "has", "had", "anymore", "any", "more", "longer", "much",
    "he", "she", "they", "we", "you", "his", "her", "their", "our", "your", "like", "likes",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "cannot", "nobody", "nothing", "neither", "nor", "none", "nowhere",
];

/// 组合后的完整上下文
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullContext {
    pub working: String,
    pub session: SessionView,
    pub long_term: Vec<String>,
    pub emotion: Option<String>,
    pub active_topics: Vec<String>,
}

impl FullContext {
    /// 固定顺序：长期记忆、会话摘要、当前情绪、活跃话题；空段省略
    pub fn format_for_prompt(&self) -> String {
        let mut sections = Vec::new();
        if !self.long_term.is_empty() {
            sections.push(format!(
                "相关长期记忆：\n{}",
                MemoryManager::format_memories_for_prompt(&self.long_term)
            ));
        }
        if !self.session.summary.trim().is_empty() {
            sections.push(format!("会话摘要：\n{}", self.session.summary));
        }
        if let Some(emotion) = &self.emotion {
            sections.push(format!("当前情绪：{}", emotion));
        }
        if !self.active_topics.is_empty() {
            sections.push(format!("活跃话题：{}", self.active_topics.join("、")));
        }
        sections.join("\n\n")
    }
}

/// 写入长期记忆前检测到的疑似冲突
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub new_fact: String,
    pub existing_fact: String,
}

pub struct HierarchicalMemoryManager {
    session_id: String,
    config: HierarchyConfig,
    working: WorkingMemory,
    session: SessionMemory,
    long_term: Arc<MemoryManager>,
}

impl HierarchicalMemoryManager {
    pub fn new(
        session_id: impl Into<String>,
        long_term: Arc<MemoryManager>,
        config: HierarchyConfig,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            working: Self::fresh_working(&config),
            session: Self::fresh_session(&session_id, &config),
            session_id,
            config,
            long_term,
        }
    }

    fn fresh_working(config: &HierarchyConfig) -> WorkingMemory {
        WorkingMemory::new(config.working_memory_turns).with_preview_chars(config.preview_chars)
    }

    fn fresh_session(session_id: &str, config: &HierarchyConfig) -> SessionMemory {
        SessionMemory::new(session_id).summarize_after(config.summarize_after_turns)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn session(&self) -> &SessionMemory {
        &self.session
    }

    pub fn long_term(&self) -> &Arc<MemoryManager> {
        &self.long_term
    }

    pub fn add_message(&mut self, message: &Message) {
        self.working.push(Turn::from_message(message));
        self.session.increment_turn();
    }

    pub fn update_emotion(&mut self, emotion: impl Into<String>) {
        self.working.update_emotion(emotion);
    }

    /// 同时记入工作记忆（活跃话题）与会话记忆（会话话题）
    pub fn add_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        self.working.add_topic(topic.clone());
        self.session.add_topic(topic);
    }

    pub fn add_pending_fact(&mut self, fact: impl Into<String>) {
        self.session.add_pending_fact(fact);
    }

    pub async fn get_full_context(&self) -> FullContext {
        let long_term = if self.working.is_empty() {
            Vec::new()
        } else {
            let query = self
                .working
                .recent_turns(QUERY_TURNS)
                .iter()
                .map(|t| t.content.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            self.long_term
                .get_relevant_memories(&query, Some(self.session_id.as_str()))
                .await
        };

        FullContext {
            working: self.working.get_context_window(),
            session: self.session.view(),
            long_term,
            emotion: self.working.current_emotion().map(str::to_string),
            active_topics: self.working.active_topics(),
        }
    }

    pub async fn format_for_prompt(&self) -> String {
        self.get_full_context().await.format_for_prompt()
    }

    /// 启发式冲突检测：与已有事实共享实词，且新事实带否定词时，返回第一条冲突的已有事实
    pub fn detect_conflict<'a, S: AsRef<str>>(new_fact: &str, existing_facts: &'a [S]) -> Option<&'a str> {
        let new_tokens = tokenize(new_fact);
        if !new_tokens.iter().any(|t| is_negation(t)) {
            return None;
        }
        let new_words = content_words(&new_tokens);

        existing_facts.iter().map(|f| f.as_ref()).find(|existing| {
            let existing_tokens = tokenize(existing);
            let existing_words = content_words(&existing_tokens);
            new_words.intersection(&existing_words).count() >= MIN_SHARED_WORDS
        })
    }

    /// 对每条待确认事实做冲突检查后写入长期记忆，返回检测到的冲突
    pub async fn flush_pending_facts(&mut self) -> Vec<Conflict> {
        let facts = self.session.take_pending_facts();
        if facts.is_empty() {
            return Vec::new();
        }

        let session_id = self.session_id.as_str();
        let related = join_all(
            facts
                .iter()
                .map(|fact| self.long_term.get_relevant_memories(fact, Some(session_id))),
        )
        .await;

        let mut conflicts = Vec::new();
        for (fact, existing) in facts.iter().zip(related) {
            if let Some(hit) = Self::detect_conflict(fact, &existing) {
                warn!(
                    session_id,
                    new_fact = %fact,
                    existing_fact = %hit,
                    "⚠️ 新事实与已有记忆可能冲突"
                );
                conflicts.push(Conflict {
                    new_fact: fact.clone(),
                    existing_fact: hit.to_string(),
                });
            }
            if let Err(e) = self.long_term.remember(fact, Some(session_id)).await {
                warn!(session_id, fact = %fact, error = %e, "⚠️ 待确认事实写入失败");
            }
        }
        conflicts
    }

    pub fn needs_summarization(&self) -> bool {
        self.session.needs_summarization()
    }

    /// 用外部摘要器生成会话摘要；失败时保持原摘要不变，返回是否更新
    pub async fn summarize(&mut self, summarizer: &dyn ConversationSummarizer) -> bool {
        let turns: Vec<Turn> = self.working.turns().cloned().collect();
        if turns.is_empty() {
            return false;
        }
        let previous = Some(self.session.summary()).filter(|s| !s.trim().is_empty());

        match summarizer.summarize(previous, &turns).await {
            Ok(summary) if !summary.trim().is_empty() => {
                self.session.update_summary(summary);
                info!(
                    session_id = %self.session_id,
                    turn_count = self.session.turn_count(),
                    "📝 会话摘要已更新"
                );
                true
            }
            Ok(_) => {
                debug!(session_id = %self.session_id, "摘要为空，保留原摘要");
                false
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "⚠️ 会话摘要失败，保留原摘要");
                false
            }
        }
    }

    /// 清空工作记忆并重建会话记忆；长期记忆不受影响
    pub fn clear_session(&mut self) {
        self.working.clear();
        self.session = Self::fresh_session(&self.session_id, &self.config);
        debug!(session_id = %self.session_id, "🧹 会话记忆已清空");
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('’', "'")
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_negation(token: &str) -> bool {
    NEGATIONS.contains(&token) || token.ends_with("n't")
}

fn content_words(tokens: &[String]) -> HashSet<&str> {
    tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !is_negation(t) && !FILLER_WORDS.contains(t))
        .collect()
}
