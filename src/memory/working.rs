//! 工作记忆：最近几轮对话 + 当前情绪 + 活跃话题，全部在内存中

use crate::llm::types::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_WORKING_TURNS: usize = 5;
pub const DEFAULT_PREVIEW_CHARS: usize = 200;
pub const MAX_ACTIVE_TOPICS: usize = 5;

/// 对话中的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_message(message: &Message) -> Self {
        Self::new(message.role.clone(), message.text())
    }

    /// `Role: 内容`，内容超过 `preview_chars` 个字符时截断并追加 `...`
    pub fn preview(&self, preview_chars: usize) -> String {
        let content = if self.content.chars().count() > preview_chars {
            let cut: String = self.content.chars().take(preview_chars).collect();
            format!("{}...", cut)
        } else {
            self.content.clone()
        };
        format!("{}: {}", capitalize(&self.role), content)
    }
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 最近 N 轮（2N 条消息）的滑动窗口
///
/// 超出容量时从最早的消息开始丢弃；话题最多保留 [`MAX_ACTIVE_TOPICS`] 个，先进先出。
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
    preview_chars: usize,
    current_emotion: Option<String>,
    active_topics: VecDeque<String>,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(DEFAULT_WORKING_TURNS)
    }
}

impl WorkingMemory {
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns * 2),
            max_turns,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            current_emotion: None,
            active_topics: VecDeque::with_capacity(MAX_ACTIVE_TOPICS),
        }
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars.max(1);
        self
    }

    /// 可容纳的消息条数（一问一答算两条）
    pub fn capacity(&self) -> usize {
        self.max_turns * 2
    }

    pub fn add_turn(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.push(Turn::new(role, content));
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity() {
            self.turns.pop_front();
        }
    }

    /// 按时间顺序渲染为 `Role: 内容` 行
    pub fn get_context_window(&self) -> String {
        self.turns
            .iter()
            .map(|t| t.preview(self.preview_chars))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn update_emotion(&mut self, emotion: impl Into<String>) {
        let emotion = emotion.into();
        let emotion = emotion.trim();
        self.current_emotion = (!emotion.is_empty()).then(|| emotion.to_string());
    }

    pub fn current_emotion(&self) -> Option<&str> {
        self.current_emotion.as_deref()
    }

    /// 已存在的话题忽略；超过上限时淘汰最早的话题
    pub fn add_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if topic.trim().is_empty() || self.active_topics.contains(&topic) {
            return;
        }
        self.active_topics.push_back(topic);
        while self.active_topics.len() > MAX_ACTIVE_TOPICS {
            self.active_topics.pop_front();
        }
    }

    pub fn active_topics(&self) -> Vec<String> {
        self.active_topics.iter().cloned().collect()
    }

    /// 最近 `n` 条消息，按时间顺序
    pub fn recent_turns(&self, n: usize) -> Vec<&Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.current_emotion = None;
        self.active_topics.clear();
    }
}
