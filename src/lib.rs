pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod resilience;
pub mod testing;
pub mod vector_db;

pub mod prelude {
    pub use crate::config::MemoryConfig;
    pub use crate::context::{MemoryContext, MemoryContextBuilder};
    pub use crate::embedding::Embedder;
    pub use crate::error::{MemoryError, Result};
    pub use crate::llm::LlmClient;
    pub use crate::llm::types::Message;
    pub use crate::memory::{
        HierarchicalMemoryManager, Memory, MemoryManager, SessionRegistry, StoreOutcome,
        VectorStore,
    };
    pub use crate::resilience::{CircuitBreaker, CircuitState, Guarded};
    pub use crate::vector_db::VectorDatabase;
}
