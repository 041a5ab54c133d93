//! 记忆系统
//!
//! | 层次 | 实现 | 作用域 |
//! |------|------|--------|
//! | 工作记忆 | [`WorkingMemory`] | 最近 N 轮对话 |
//! | 会话记忆 | [`SessionMemory`] | 单个会话 |
//! | 长期记忆 | [`MemoryManager`] + [`VectorStore`] | 跨会话，向量库持久化 |
//!
//! [`HierarchicalMemoryManager`] 把三层组合成一份上下文，[`SessionRegistry`] 按会话持有它们。
//!
//! ## 长期记忆
//!
//! ```rust,no_run
//! use echo_memory::llm::types::Message;
//! use echo_memory::memory::MemoryManager;
//!
//! # async fn example(manager: MemoryManager) {
//! // 判定重要性后写入（失败只记日志）
//! manager
//!     .extract_and_store_memories(&Message::user("我超爱喝咖啡"), Some("alice"))
//!     .await;
//!
//! let memories = manager.get_relevant_memories("喝点什么", Some("alice")).await;
//! let prompt = MemoryManager::format_memories_for_prompt(&memories);
//! # }
//! ```
//!
//! ## 分层记忆
//!
//! ```rust,no_run
//! use echo_memory::llm::types::Message;
//! use echo_memory::memory::SessionRegistry;
//!
//! # async fn example(registry: &SessionRegistry) -> echo_memory::error::Result<()> {
//! let session = registry.get_or_create("alice")?;
//! let mut session = session.lock().await;
//! session.add_message(&Message::user("今天有点累"));
//! session.update_emotion("tired");
//! let context = session.format_for_prompt().await;
//! # Ok(())
//! # }
//! ```

pub mod hierarchical;
pub mod judge;
pub mod manager;
pub mod registry;
pub mod session;
pub mod summarizer;
pub mod types;
pub mod vector_store;
pub mod working;

pub use hierarchical::{Conflict, FullContext, HierarchicalMemoryManager};
pub use judge::{ImportanceJudge, Judgement, LlmImportanceJudge};
pub use manager::MemoryManager;
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{SessionMemory, SessionView};
pub use summarizer::{
    ConversationSummarizer, DefaultSummaryPrompt, FnSummaryPrompt, LlmSummarizer,
    SummaryPromptBuilder,
};
pub use types::{Memory, MemoryMetadata, StoreOutcome};
pub use vector_store::VectorStore;
pub use working::{Turn, WorkingMemory};
