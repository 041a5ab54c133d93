//! 应用上下文：每个外部服务一个熔断器，共享的向量存储、记忆管理器与会话表
//!
//! ```rust,no_run
//! use echo_memory::config::MemoryConfig;
//! use echo_memory::context::MemoryContext;
//! use echo_memory::llm::config::Config;
//!
//! # fn example() -> echo_memory::error::Result<()> {
//! let config = MemoryConfig::default().apply_env_overrides()?.validate()?;
//! let models = Config::from_env()?;
//! let ctx = MemoryContext::from_config(config, &models)?;
//! for snapshot in ctx.breaker_snapshots() {
//!     println!("{} {}", snapshot.name, snapshot.state);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{BreakerConfig, MemoryConfig};
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::error::{ConfigError, MemoryError, Result};
use crate::llm::config::Config;
use crate::llm::{DefaultLlmClient, LlmClient};
use crate::memory::{
    ConversationSummarizer, ImportanceJudge, LlmImportanceJudge, LlmSummarizer, MemoryManager,
    SessionRegistry, VectorStore,
};
use crate::resilience::{CircuitBreaker, CircuitBreakerSnapshot, Guarded};
use crate::vector_db::{QdrantClient, VectorDatabase};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const LLM_BREAKER: &str = "llm";
pub const EMBEDDING_BREAKER: &str = "embedding";
pub const VECTOR_DB_BREAKER: &str = "vector_db";

pub struct MemoryContext {
    config: MemoryConfig,
    llm: Arc<dyn LlmClient>,
    llm_breaker: Arc<CircuitBreaker>,
    embedding_breaker: Arc<CircuitBreaker>,
    vector_db_breaker: Arc<CircuitBreaker>,
    store: Arc<VectorStore>,
    manager: Arc<MemoryManager>,
    summarizer: Arc<dyn ConversationSummarizer>,
    sessions: Arc<SessionRegistry>,
}

impl MemoryContext {
    pub fn builder(config: MemoryConfig) -> MemoryContextBuilder {
        MemoryContextBuilder {
            config,
            llm: None,
            judge_llm: None,
            judge: None,
            embedder: None,
            vector_db: None,
        }
    }

    /// 按配置创建真实的 HTTP 客户端（LLM、向量化服务、Qdrant）
    pub fn from_config(config: MemoryConfig, models: &Config) -> Result<Self> {
        let model = models.get_model(&config.judge_model)?;
        let llm_http = Arc::new(Client::new());
        let embedding_http = Arc::new(http_client(config.embedding.timeout_secs)?);
        let vector_db_http = Arc::new(http_client(config.vector_db.timeout_secs)?);

        let chat = DefaultLlmClient::new(llm_http.clone(), model.clone());
        let judge_llm = DefaultLlmClient::new(llm_http, model).json_output(true);
        let embedder = OpenAiEmbedder::new(
            embedding_http,
            config.embedding.model.clone(),
            config.embedding.baseurl.clone(),
            config.embedding.apikey.clone(),
        );
        let vector_db = QdrantClient::new(
            vector_db_http,
            config.vector_db.url.clone(),
            config.vector_db.api_key.clone(),
        );

        Self::builder(config)
            .llm(Arc::new(chat))
            .judge_llm(Arc::new(judge_llm))
            .embedder(Arc::new(embedder))
            .vector_db(Arc::new(vector_db))
            .build()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// 经过 LLM 熔断器的对话客户端
    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    pub fn summarizer(&self) -> &Arc<dyn ConversationSummarizer> {
        &self.summarizer
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        [
            &self.llm_breaker,
            &self.embedding_breaker,
            &self.vector_db_breaker,
        ]
        .iter()
        .map(|b| b.snapshot())
        .collect()
    }
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| MemoryError::Other(format!("Failed to build HTTP client: {}", e)))
}

fn breaker(name: &str, config: &BreakerConfig) -> Result<Arc<CircuitBreaker>> {
    CircuitBreaker::new(name, config.failure_threshold, config.recovery_timeout()?).map(Arc::new)
}

fn missing(component: &str) -> MemoryError {
    ConfigError::InvalidValue {
        field: component.to_string(),
        message: "not configured".to_string(),
    }
    .into()
}

/// 注入外部客户端（测试时注入 Mock），统一套上熔断器
pub struct MemoryContextBuilder {
    config: MemoryConfig,
    llm: Option<Arc<dyn LlmClient>>,
    judge_llm: Option<Arc<dyn LlmClient>>,
    judge: Option<Arc<dyn ImportanceJudge>>,
    embedder: Option<Arc<dyn Embedder>>,
    vector_db: Option<Arc<dyn VectorDatabase>>,
}

impl MemoryContextBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 重要性判定专用的客户端（例如要求 JSON 输出），缺省时复用 `llm`
    pub fn judge_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.judge_llm = Some(llm);
        self
    }

    /// 直接替换重要性判定器
    pub fn judge(mut self, judge: Arc<dyn ImportanceJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn vector_db(mut self, vector_db: Arc<dyn VectorDatabase>) -> Self {
        self.vector_db = Some(vector_db);
        self
    }

    pub fn build(self) -> Result<MemoryContext> {
        let config = self.config.validate()?;
        let raw_llm = self.llm.ok_or_else(|| missing("llm"))?;
        let embedder = self.embedder.ok_or_else(|| missing("embedder"))?;
        let vector_db = self.vector_db.ok_or_else(|| missing("vector_db"))?;

        let llm_breaker = breaker(LLM_BREAKER, &config.breakers.llm)?;
        let embedding_breaker = breaker(EMBEDDING_BREAKER, &config.breakers.embedding)?;
        let vector_db_breaker = breaker(VECTOR_DB_BREAKER, &config.breakers.vector_db)?;

        let llm: Arc<dyn LlmClient> = Arc::new(Guarded::new(raw_llm.clone(), llm_breaker.clone()));
        let judge: Arc<dyn ImportanceJudge> = match self.judge {
            Some(judge) => judge,
            None => {
                let judge_llm = self.judge_llm.unwrap_or(raw_llm);
                Arc::new(LlmImportanceJudge::new(Arc::new(Guarded::new(
                    judge_llm,
                    llm_breaker.clone(),
                ))))
            }
        };

        let store = Arc::new(
            VectorStore::new(
                vector_db,
                Arc::new(Guarded::new(embedder, embedding_breaker.clone())),
                vector_db_breaker.clone(),
                config.vector_db.collection.clone(),
            )
            .similarity_threshold(config.retrieval.similarity_threshold)
            .session_isolation(config.retrieval.session_isolation),
        );
        let manager = Arc::new(MemoryManager::new(store.clone(), judge).top_k(config.retrieval.top_k));
        let summarizer: Arc<dyn ConversationSummarizer> = Arc::new(LlmSummarizer::new(llm.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            manager.clone(),
            config.hierarchy.clone(),
            config.sessions.idle_timeout(),
        ));

        info!(
            collection = %config.vector_db.collection,
            top_k = config.retrieval.top_k,
            session_isolation = config.retrieval.session_isolation,
            "🚀 记忆上下文已就绪"
        );

        Ok(MemoryContext {
            config,
            llm,
            llm_breaker,
            embedding_breaker,
            vector_db_breaker,
            store,
            manager,
            summarizer,
            sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;
    use crate::resilience::CircuitState;
    use crate::testing::{FlakyVectorDatabase, MockEmbedder, MockLlmClient};

    fn context_with(
        llm: MockLlmClient,
        db: Arc<FlakyVectorDatabase>,
        config: MemoryConfig,
    ) -> MemoryContext {
        MemoryContext::builder(config)
            .llm(Arc::new(llm))
            .embedder(Arc::new(MockEmbedder::new(64)))
            .vector_db(db)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_store_and_recall() {
        let db = Arc::new(FlakyVectorDatabase::new());
        let llm = MockLlmClient::new()
            .with_judgement(Some("User loves coffee"));
        let ctx = context_with(llm, db.clone(), MemoryConfig::default());

        ctx.manager()
            .extract_and_store_memories(&Message::user("我超爱喝咖啡"), Some("alice"))
            .await;
        assert_eq!(db.inner().point_count("user_memories").await, 1);

        let session = ctx.sessions().get_or_create("alice").unwrap();
        let mut session = session.lock().await;
        session.add_message(&Message::user("User loves coffee?"));
        let prompt = session.format_for_prompt().await;
        assert!(prompt.starts_with("相关长期记忆：\n- User loves coffee"));
    }

    #[tokio::test]
    async fn test_breaker_snapshots_report_each_service() {
        let db = Arc::new(FlakyVectorDatabase::new());
        let mut config = MemoryConfig::default();
        config.breakers.vector_db.failure_threshold = 1;
        let ctx = context_with(MockLlmClient::new(), db.clone(), config);

        db.set_unavailable(true);
        assert!(ctx.manager().get_relevant_memories("coffee", None).await.is_empty());

        let snapshots = ctx.breaker_snapshots();
        let names: Vec<&str> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![LLM_BREAKER, EMBEDDING_BREAKER, VECTOR_DB_BREAKER]);
        assert_eq!(snapshots[0].state, CircuitState::Closed);
        assert_eq!(snapshots[1].state, CircuitState::Closed);
        assert_eq!(snapshots[2].state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_llm_outage_only_opens_llm_breaker() {
        let db = Arc::new(FlakyVectorDatabase::new());
        let mut config = MemoryConfig::default();
        config.breakers.llm.failure_threshold = 2;
        let llm = MockLlmClient::new()
            .with_network_error("503")
            .with_network_error("503")
            .with_judgement(Some("never used"));
        let ctx = context_with(llm, db.clone(), config);

        for _ in 0..3 {
            ctx.manager()
                .extract_and_store_memories(&Message::user("I love coffee"), None)
                .await;
        }
        let snapshots = ctx.breaker_snapshots();
        assert_eq!(snapshots[0].state, CircuitState::Open);
        assert_eq!(snapshots[2].state, CircuitState::Closed);
        assert_eq!(db.upsert_calls(), 0);

        ctx.manager().remember("User loves coffee", None).await.unwrap();
        assert_eq!(db.inner().point_count("user_memories").await, 1);
    }

    #[test]
    fn test_build_requires_all_clients() {
        let result = MemoryContext::builder(MemoryConfig::default())
            .llm(Arc::new(MockLlmClient::new()))
            .build();
        assert!(matches!(result, Err(MemoryError::Config(_))));
    }

    #[test]
    fn test_build_rejects_invalid_breaker_config() {
        let mut config = MemoryConfig::default();
        config.breakers.embedding.failure_threshold = 0;
        let result = MemoryContext::builder(config)
            .llm(Arc::new(MockLlmClient::new()))
            .embedder(Arc::new(MockEmbedder::new(8)))
            .vector_db(Arc::new(FlakyVectorDatabase::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_infinite_recovery_timeout() {
        let mut config = MemoryConfig::default();
        config.breakers.vector_db.recovery_timeout_secs = f64::INFINITY;
        let result = MemoryContext::builder(config)
            .llm(Arc::new(MockLlmClient::new()))
            .embedder(Arc::new(MockEmbedder::new(8)))
            .vector_db(Arc::new(FlakyVectorDatabase::new()))
            .build();
        assert!(matches!(
            result.err(),
            Some(MemoryError::Config(ConfigError::InvalidValue { .. }))
        ));
    }
}
