use crate::embedding::cosine_similarity;
use crate::error::{Result, VectorDbError};
use crate::vector_db::{Distance, Point, PointSelector, ScopeFilter, ScoredPoint, VectorDatabase};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

struct Collection {
    dimension: usize,
    distance: Distance,
    points: HashMap<String, Point>,
}

/// 进程内存向量库，不持久化，适合测试和短生命周期使用
///
/// 检索时先按 [`ScopeFilter`] 过滤再打分排序，与远程库的语义一致。
///
/// # 示例
///
/// ```rust,no_run
/// use echo_memory::vector_db::{Distance, InMemoryVectorDatabase, Point, VectorDatabase};
///
/// # async fn example() -> echo_memory::error::Result<()> {
/// let db = InMemoryVectorDatabase::new();
/// db.create_collection("memories", 2, Distance::Cosine).await?;
/// db.upsert("memories", vec![Point {
///     id: "m1".to_string(),
///     vector: vec![1.0, 0.0],
///     payload: Default::default(),
/// }]).await?;
/// let hits = db.search("memories", &[1.0, 0.0], 5, None).await?;
/// # Ok(())
/// # }
/// ```
pub struct InMemoryVectorDatabase {
    collections: RwLock<HashMap<String, Collection>>,
}

impl Default for InMemoryVectorDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorDatabase {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// 集合中的点数（集合不存在时为 0）
    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    /// 按 id 读取一个点
    pub async fn get_point(&self, collection: &str, id: &str) -> Option<Point> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.points.get(id))
            .cloned()
    }
}

fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        Distance::Euclid => -a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

#[async_trait]
impl VectorDatabase for InMemoryVectorDatabase {
    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection) {
            return Err(VectorDbError::AlreadyExists(collection.to_string()).into());
        }
        collections.insert(
            collection.to_string(),
            Collection {
                dimension,
                distance,
                points: HashMap::new(),
            },
        );
        debug!(collection, dimension, "📦 集合已创建");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorDbError::CollectionNotFound(collection.to_string()))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(VectorDbError::ApiError {
                status: 400,
                message: format!(
                    "Wrong input: vector dimension error: expected dim: {}, got {}",
                    target.dimension,
                    bad.vector.len()
                ),
            }
            .into());
        }
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&ScopeFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorDbError::CollectionNotFound(collection.to_string()))?;

        let mut scored: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: score(target.distance, vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, selector: PointSelector) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorDbError::CollectionNotFound(collection.to_string()))?;
        match selector {
            PointSelector::Ids(ids) => {
                for id in ids {
                    target.points.remove(&id);
                }
            }
            PointSelector::Filter(filter) => {
                target.points.retain(|_, p| !filter.matches(&p.payload));
            }
        }
        Ok(())
    }
}
