use crate::embedding::Embedder;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::llm::types::Message;
use crate::resilience::CircuitBreaker;
use async_trait::async_trait;
use std::sync::Arc;

/// 用熔断器包裹任意外部客户端
///
/// 包裹的是接口而非具体实现：`Guarded<C>` 自身也实现 `C` 所实现的接口，
/// 因此可以替换后端而不改动熔断或记忆逻辑。
pub struct Guarded<C> {
    inner: C,
    breaker: Arc<CircuitBreaker>,
}

impl<C> Guarded<C> {
    pub fn new(inner: C, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for Guarded<C> {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        self.breaker
            .call_async(|| self.inner.chat_simple(messages))
            .await
    }
}

#[async_trait]
impl<C: Embedder> Embedder for Guarded<C> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.breaker.call_async(|| self.inner.embed(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use crate::testing::{MockEmbedder, MockLlmClient};
    use std::time::Duration;

    #[tokio::test]
    async fn test_guarded_llm_opens_and_short_circuits() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_network_error("timeout")
                .with_network_error("timeout")
                .with_response("不会被调用"),
        );
        let breaker = Arc::new(CircuitBreaker::new("llm", 2, Duration::from_secs(60)).unwrap());
        let guarded = Guarded::new(mock.clone(), breaker.clone());

        for _ in 0..2 {
            assert!(guarded.chat_simple(vec![Message::user("hi")]).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = guarded
            .chat_simple(vec![Message::user("hi")])
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn test_guarded_embedder_validation_not_counted() {
        let breaker = Arc::new(CircuitBreaker::new("embedding", 1, Duration::from_secs(60)).unwrap());
        let guarded = Guarded::new(MockEmbedder::new(16), breaker.clone());

        assert!(guarded.embed("").await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(guarded.embed("coffee").await.unwrap().len(), 16);
    }
}
