//! 远程向量数据库接口
//!
//! [`VectorDatabase`] 只描述记忆层需要的最小能力：集合存在性 / 创建、
//! upsert、带范围过滤的相似度检索、删除。
//!
//! ## 内置实现
//!
//! - [`QdrantClient`]：Qdrant REST API
//! - [`InMemoryVectorDatabase`]：进程内存，适合测试和本地调试

mod in_memory;
mod qdrant;

pub use in_memory::InMemoryVectorDatabase;
pub use qdrant::QdrantClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// 向量距离度量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

/// 点的附加数据（任意 JSON 字段）
pub type Payload = Map<String, Value>;

/// 待写入的点
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// 检索命中的点
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// 范围过滤：所有条件都必须满足
///
/// 作为检索请求的一部分下发到数据库，而不是对 top-k 结果做事后过滤。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    must: Vec<(String, String)>,
    must_be_empty: Vec<String>,
}

impl ScopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只匹配指定会话的点
    pub fn session(session_id: &str) -> Self {
        Self::new().must_match("session_id", session_id)
    }

    pub fn must_match(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.must.push((key.into(), value.into()));
        self
    }

    /// 只匹配没有会话归属的点
    pub fn sessionless() -> Self {
        Self::new().must_be_empty("session_id")
    }

    /// 精确的会话范围：有会话时匹配该会话，无会话时只匹配无归属的点
    pub fn exact_session(session_id: Option<&str>) -> Self {
        match session_id {
            Some(id) => Self::session(id),
            None => Self::sessionless(),
        }
    }

    /// 字段缺失或为 null
    pub fn must_be_empty(mut self, key: impl Into<String>) -> Self {
        self.must_be_empty.push(key.into());
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.must
    }

    pub fn empty_keys(&self) -> &[String] {
        &self.must_be_empty
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        let matched = self
            .must
            .iter()
            .all(|(key, value)| payload.get(key).and_then(Value::as_str) == Some(value.as_str()));
        matched
            && self
                .must_be_empty
                .iter()
                .all(|key| payload.get(key).is_none_or(Value::is_null))
    }
}

/// 删除目标
#[derive(Debug, Clone, PartialEq)]
pub enum PointSelector {
    Ids(Vec<String>),
    Filter(ScopeFilter),
}

/// 向量数据库统一接口
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// 创建集合；已存在时返回 [`VectorDbError::AlreadyExists`](crate::error::VectorDbError::AlreadyExists)
    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<()>;

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    /// 相似度检索，按分数降序；集合不存在时返回
    /// [`VectorDbError::CollectionNotFound`](crate::error::VectorDbError::CollectionNotFound)
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&ScopeFilter>,
    ) -> Result<Vec<ScoredPoint>>;

    async fn delete(&self, collection: &str, selector: PointSelector) -> Result<()>;
}

#[async_trait]
impl<T: VectorDatabase + ?Sized> VectorDatabase for Arc<T> {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        (**self).collection_exists(collection).await
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<()> {
        (**self)
            .create_collection(collection, dimension, distance)
            .await
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        (**self).upsert(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&ScopeFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        (**self).search(collection, vector, limit, filter).await
    }

    async fn delete(&self, collection: &str, selector: PointSelector) -> Result<()> {
        (**self).delete(collection, selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_filter_matches_exact_string() {
        let filter = ScopeFilter::session("alice");
        let mut payload = Payload::new();
        payload.insert("session_id".into(), json!("alice"));
        assert!(filter.matches(&payload));

        payload.insert("session_id".into(), json!("bob"));
        assert!(!filter.matches(&payload));

        payload.remove("session_id");
        assert!(!filter.matches(&payload));
        assert!(ScopeFilter::new().matches(&payload));
    }

    #[test]
    fn test_sessionless_filter_skips_tagged_points() {
        let mut payload = Payload::new();
        assert!(ScopeFilter::sessionless().matches(&payload));
        assert!(ScopeFilter::exact_session(None).matches(&payload));

        payload.insert("session_id".into(), Value::Null);
        assert!(ScopeFilter::sessionless().matches(&payload));

        payload.insert("session_id".into(), json!("alice"));
        assert!(!ScopeFilter::sessionless().matches(&payload));
        assert!(ScopeFilter::exact_session(Some("alice")).matches(&payload));
        assert!(!ScopeFilter::exact_session(Some("bob")).matches(&payload));
    }
}
