//! 韧性原语
//!
//! - [`CircuitBreaker`]：失败隔离，每个外部服务（LLM、向量化、向量库）各一个共享实例
//! - [`Guarded`]：把熔断器套在 [`LlmClient`](crate::llm::LlmClient) /
//!   [`Embedder`](crate::embedding::Embedder) 接口外层

mod circuit_breaker;
mod guarded;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerSnapshot, CircuitState, FailurePredicate,
};
pub use guarded::Guarded;
