//! 长期记忆的向量持久层
//!
//! 文本 → 向量 → 远程集合。每一次向量库调用都经过专属的熔断器；
//! 向量化调用经过向量化服务自己的熔断器（见 [`Guarded`](crate::resilience::Guarded)）。
//!
//! 熔断打开时在本层降级：写入被丢弃（[`StoreOutcome::Skipped`]），检索返回空列表，
//! 上层永远看不到熔断错误。输入校验错误（空文本）直接返回。
//!
//! 集合在第一次写入时按向量维度惰性创建（余弦距离），并发创建时
//! "已存在" 视为成功。

use crate::embedding::Embedder;
use crate::error::{MemoryError, Result, VectorDbError};
use crate::memory::types::{Memory, MemoryMetadata, StoreOutcome};
use crate::resilience::CircuitBreaker;
use crate::vector_db::{Distance, Point, PointSelector, ScopeFilter, VectorDatabase};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.9;

const DIMENSION_PROBE: &str = "dimension probe";

pub struct VectorStore {
    db: Arc<dyn VectorDatabase>,
    embedder: Arc<dyn Embedder>,
    breaker: Arc<CircuitBreaker>,
    collection: String,
    similarity_threshold: f32,
    session_isolation: bool,
    collection_ready: AtomicBool,
}

impl VectorStore {
    pub fn new(
        db: Arc<dyn VectorDatabase>,
        embedder: Arc<dyn Embedder>,
        breaker: Arc<CircuitBreaker>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            db,
            embedder,
            breaker,
            collection: collection.into(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            session_isolation: true,
            collection_ready: AtomicBool::new(false),
        }
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn session_isolation(mut self, enabled: bool) -> Self {
        self.session_isolation = enabled;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// 写入一条记忆；同一会话范围内存在近似重复时复用其 ID（原地更新）
    ///
    /// 去重范围始终是精确的会话归属：无会话的写入只与无会话的记忆去重，
    /// 不会接管任何会话的记忆；与检索是否开启会话隔离无关。
    pub async fn store_memory(
        &self,
        text: &str,
        metadata: MemoryMetadata,
        session_id: Option<&str>,
    ) -> Result<StoreOutcome> {
        if text.trim().is_empty() {
            return Err(MemoryError::empty_text("memory text"));
        }
        let mut metadata = metadata;
        if session_id.is_some() {
            metadata.session_id = session_id.map(str::to_string);
        }

        let outcome = async {
            let vector = self.embedder.embed(text).await?;
            self.ensure_collection(vector.len()).await?;

            let scope = ScopeFilter::exact_session(metadata.session_id.as_deref());
            let duplicate = self
                .search_with_filter(&vector, 1, Some(&scope))
                .await?
                .into_iter()
                .next()
                .filter(|m| m.score.unwrap_or(0.0) >= self.similarity_threshold)
                .filter(|m| m.session_id() == metadata.session_id.as_deref());

            match duplicate {
                Some(existing) => {
                    debug!(
                        id = %existing.id(),
                        score = existing.score.unwrap_or(0.0),
                        "♻️ 命中近似重复，原地更新"
                    );
                    metadata.id = existing.metadata.id;
                    let id = self.write(text, vector, metadata).await?;
                    Ok(StoreOutcome::Updated(id))
                }
                None => {
                    let id = self.write(text, vector, metadata).await?;
                    Ok(StoreOutcome::Inserted(id))
                }
            }
        }
        .await;

        self.degrade(outcome, || StoreOutcome::Skipped, "store_memory")
    }

    /// 按给定元数据直接写入，不做去重（调用方已决定 ID）
    pub async fn upsert_memory(&self, text: &str, metadata: MemoryMetadata) -> Result<StoreOutcome> {
        if text.trim().is_empty() {
            return Err(MemoryError::empty_text("memory text"));
        }
        let outcome = async {
            let vector = self.embedder.embed(text).await?;
            self.ensure_collection(vector.len()).await?;
            let id = self.write(text, vector, metadata).await?;
            Ok(StoreOutcome::Inserted(id))
        }
        .await;
        self.degrade(outcome, || StoreOutcome::Skipped, "upsert_memory")
    }

    /// 按相似度降序检索；启用会话隔离且给出会话时，范围过滤随检索请求下发
    pub async fn search_memories(
        &self,
        query: &str,
        k: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<Memory>> {
        if query.trim().is_empty() {
            return Err(MemoryError::empty_text("search query"));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let result = async {
            if !self.collection_exists().await {
                debug!(collection = %self.collection, "集合尚未创建，检索结果为空");
                return Ok(Vec::new());
            }
            let vector = self.embedder.embed(query).await?;
            self.search_by_vector(&vector, k, session_id).await
        }
        .await;

        self.degrade(result, Vec::new, "search_memories")
    }

    /// 查找与 `text` 相似度不低于阈值的记忆（去重的基础）
    pub async fn find_similar_memory(
        &self,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<Option<Memory>> {
        let best = self.search_memories(text, 1, session_id).await?;
        Ok(best
            .into_iter()
            .next()
            .filter(|m| m.score.unwrap_or(0.0) >= self.similarity_threshold))
    }

    /// 按 ID 删除；熔断或集合不存在时返回 `false`
    pub async fn delete_memory(&self, id: &str) -> Result<bool> {
        self.delete(PointSelector::Ids(vec![id.to_string()]), "delete_memory")
            .await
    }

    /// 删除某个会话写入的全部记忆
    pub async fn delete_session_memories(&self, session_id: &str) -> Result<bool> {
        self.delete(
            PointSelector::Filter(ScopeFilter::session(session_id)),
            "delete_session_memories",
        )
        .await
    }

    /// 预先创建集合（可选，写入路径会惰性创建）
    pub async fn init_collection(&self) -> Result<()> {
        let result = async {
            let probe = self.embedder.embed(DIMENSION_PROBE).await?;
            self.ensure_collection(probe.len()).await
        }
        .await;
        self.degrade(result, || (), "init_collection")
    }

    async fn delete(&self, selector: PointSelector, op: &'static str) -> Result<bool> {
        if !self.collection_exists().await {
            return Ok(false);
        }
        let result = self
            .breaker
            .call_async(|| self.db.delete(&self.collection, selector))
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(MemoryError::VectorDb(VectorDbError::CollectionNotFound(_))) => {
                self.collection_ready.store(false, Ordering::Release);
                Ok(false)
            }
            other => self.degrade(other.map(|_| true), || false, op),
        }
    }

    async fn write(&self, text: &str, vector: Vec<f32>, metadata: MemoryMetadata) -> Result<String> {
        let memory = Memory {
            text: text.to_string(),
            metadata,
            score: None,
        };
        let id = memory.metadata.id.clone();
        let point = Point {
            id: id.clone(),
            vector,
            payload: memory.to_payload(),
        };

        let result = self
            .breaker
            .call_async(|| self.db.upsert(&self.collection, vec![point]))
            .await;
        if let Err(MemoryError::VectorDb(VectorDbError::CollectionNotFound(_))) = &result {
            self.collection_ready.store(false, Ordering::Release);
        }
        result?;

        debug!(
            id = %id,
            session_id = ?memory.metadata.session_id,
            "💾 记忆已写入"
        );
        Ok(id)
    }

    async fn search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<Memory>> {
        let filter = self.scope_filter(session_id);
        let memories = self.search_with_filter(vector, k, filter.as_ref()).await?;
        debug!(hits = memories.len(), session_id = ?session_id, "🔍 向量检索");
        Ok(memories)
    }

    async fn search_with_filter(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&ScopeFilter>,
    ) -> Result<Vec<Memory>> {
        let result = self
            .breaker
            .call_async(|| self.db.search(&self.collection, vector, k, filter))
            .await;

        let points = match result {
            Ok(points) => points,
            Err(MemoryError::VectorDb(VectorDbError::CollectionNotFound(_))) => {
                self.collection_ready.store(false, Ordering::Release);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut memories: Vec<Memory> = points.into_iter().filter_map(Memory::from_scored).collect();
        memories.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(memories)
    }

    fn scope_filter(&self, session_id: Option<&str>) -> Option<ScopeFilter> {
        if self.session_isolation {
            session_id.map(ScopeFilter::session)
        } else {
            None
        }
    }

    /// 集合是否存在；检查本身经过熔断器，任何失败都按 "不存在" 处理
    async fn collection_exists(&self) -> bool {
        if self.collection_ready.load(Ordering::Acquire) {
            return true;
        }
        match self
            .breaker
            .call_async(|| self.db.collection_exists(&self.collection))
            .await
        {
            Ok(true) => {
                self.collection_ready.store(true, Ordering::Release);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "⚠️ 集合存在性检查失败，按不存在处理");
                false
            }
        }
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await {
            return Ok(());
        }
        let created = self
            .breaker
            .call_async(|| {
                self.db
                    .create_collection(&self.collection, dimension, Distance::Cosine)
            })
            .await;
        match created {
            Ok(()) => {
                info!(collection = %self.collection, dimension, "📦 已创建记忆集合");
            }
            Err(MemoryError::VectorDb(VectorDbError::AlreadyExists(_))) => {
                debug!(collection = %self.collection, "集合已由其他写入方创建");
            }
            Err(e) => return Err(e),
        }
        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }

    fn degrade<T>(&self, result: Result<T>, fallback: impl FnOnce() -> T, op: &str) -> Result<T> {
        match result {
            Err(MemoryError::CircuitOpen(open)) => {
                warn!(
                    op,
                    breaker = %open.name,
                    retry_after_secs = open.retry_after.as_secs_f64(),
                    "⛔ 依赖熔断中，操作已降级"
                );
                Ok(fallback())
            }
            other => other,
        }
    }
}
