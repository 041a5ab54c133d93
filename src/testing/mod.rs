//! 测试基础设施
//!
//! 提供在不依赖真实 LLM / 向量化服务 / 向量库的情况下测试记忆子系统各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockLlmClient`] | 替代真实 LLM，测试重要性判定与会话摘要 |
//! | [`MockEmbedder`] | 确定性向量，可固定指定文本的向量、注入故障 |
//! | [`FlakyVectorDatabase`] | 内存向量库 + 故障注入 + 调用计数 |
//!
//! # 设计原则
//!
//! - **零网络请求**：所有 Mock 都完全在内存中运行
//! - **可脚本化**：通过 `with_response()` / `with_vector()` / `fail_next()` 精确控制行为
//! - **可观测**：通过 `call_count()` 等方法检查调用情况
//!
//! # 使用示例
//!
//! ```rust
//! use echo_memory::testing::{FlakyVectorDatabase, MockEmbedder};
//! use echo_memory::embedding::Embedder;
//! use echo_memory::vector_db::VectorDatabase;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let embedder = MockEmbedder::new(32);
//! let v = embedder.embed("User loves coffee").await.unwrap();
//! assert_eq!(v.len(), 32);
//!
//! let db = FlakyVectorDatabase::new();
//! db.fail_next(1);
//! assert!(db.collection_exists("memories").await.is_err());
//! assert!(!db.collection_exists("memories").await.unwrap());
//! # }
//! ```

mod flaky_vector_db;
mod mock_embedder;
mod mock_llm;

pub use flaky_vector_db::FlakyVectorDatabase;
pub use mock_embedder::MockEmbedder;
pub use mock_llm::MockLlmClient;
