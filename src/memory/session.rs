//! 会话记忆：单个会话生命周期内的摘要、话题、待确认事实与轮次计数

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_SUMMARIZE_AFTER_TURNS: u32 = 10;

#[derive(Debug, Clone)]
pub struct SessionMemory {
    session_id: String,
    summary: String,
    topics: Vec<String>,
    pending_facts: Vec<String>,
    turn_count: u32,
    started_at: DateTime<Utc>,
    last_summarized_turn: u32,
    summarize_after_turns: u32,
}

/// 对外展示用的会话视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub summary: String,
    pub topics: Vec<String>,
    pub turn_count: u32,
}

impl SessionMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            summary: String::new(),
            topics: Vec::new(),
            pending_facts: Vec::new(),
            turn_count: 0,
            started_at: Utc::now(),
            last_summarized_turn: 0,
            summarize_after_turns: DEFAULT_SUMMARIZE_AFTER_TURNS,
        }
    }

    pub fn summarize_after(mut self, turns: u32) -> Self {
        self.summarize_after_turns = turns.max(1);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn pending_facts(&self) -> &[String] {
        &self.pending_facts
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_summarized_turn(&self) -> u32 {
        self.last_summarized_turn
    }

    pub fn increment_turn(&mut self) {
        self.turn_count += 1;
    }

    pub fn add_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if !topic.trim().is_empty() && !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
    }

    pub fn add_pending_fact(&mut self, fact: impl Into<String>) {
        let fact = fact.into();
        if !fact.trim().is_empty() {
            self.pending_facts.push(fact);
        }
    }

    /// 取出并清空待确认事实
    pub fn take_pending_facts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_facts)
    }

    /// 写入外部生成的摘要，并以当前轮次重新计算触发点
    pub fn update_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
        self.last_summarized_turn = self.turn_count;
    }

    pub fn needs_summarization(&self) -> bool {
        self.turn_count - self.last_summarized_turn >= self.summarize_after_turns
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            summary: self.summary.clone(),
            topics: self.topics.clone(),
            turn_count: self.turn_count,
        }
    }
}
