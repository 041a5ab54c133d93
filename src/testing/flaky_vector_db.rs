//! 可注入故障的向量库，包裹 [`InMemoryVectorDatabase`]

use crate::error::{Result, VectorDbError};
use crate::vector_db::{
    Distance, InMemoryVectorDatabase, Point, PointSelector, ScopeFilter, ScoredPoint,
    VectorDatabase,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 在内存向量库外层注入网络故障，并统计各类调用次数
///
/// - [`fail_next`](FlakyVectorDatabase::fail_next)：接下来 n 次调用失败
/// - [`set_unavailable`](FlakyVectorDatabase::set_unavailable)：持续不可用，直到恢复
pub struct FlakyVectorDatabase {
    inner: InMemoryVectorDatabase,
    failures_left: AtomicUsize,
    unavailable: AtomicBool,
    calls: AtomicUsize,
    create_calls: AtomicUsize,
    search_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl Default for FlakyVectorDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyVectorDatabase {
    pub fn new() -> Self {
        Self {
            inner: InMemoryVectorDatabase::new(),
            failures_left: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryVectorDatabase {
        &self.inner
    }

    /// 所有接口的调用总次数（含失败）
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VectorDbError::NetworkError("connection refused".to_string()).into());
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(VectorDbError::NetworkError("connection reset".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl VectorDatabase for FlakyVectorDatabase {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        self.check()?;
        self.inner.collection_exists(collection).await
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner
            .create_collection(collection, dimension, distance)
            .await
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.upsert(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&ScopeFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.search(collection, vector, limit, filter).await
    }

    async fn delete(&self, collection: &str, selector: PointSelector) -> Result<()> {
        self.check()?;
        self.inner.delete(collection, selector).await
    }
}
