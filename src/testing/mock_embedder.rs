//! 确定性的本地向量化实现
//!
//! 默认把文本按词哈希到固定维度的桶里再归一化：相同文本得到相同向量（余弦 = 1），
//! 共享词越多越相似。需要精确控制相似度时用 [`MockEmbedder::with_vector`] 指定向量。

use crate::embedding::Embedder;
use crate::error::{EmbeddingError, MemoryError, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MockEmbedder {
    dimension: usize,
    overrides: Mutex<HashMap<String, Vec<f32>>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            overrides: Mutex::new(HashMap::new()),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// 为指定文本固定返回给定向量
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.lock().unwrap().insert(text.into(), vector);
        self
    }

    /// 接下来 `n` 次调用返回网络错误
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::empty_text("embedding input"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(EmbeddingError::NetworkError("mock embedding outage".to_string()).into());
        }

        if let Some(vector) = self.overrides.lock().unwrap().get(text) {
            return Ok(vector.clone());
        }
        Ok(self.hashed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_same_text_same_vector() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("User loves coffee").await.unwrap();
        let b = embedder.embed("user LOVES coffee").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let embedder = MockEmbedder::new(8);
        embedder.fail_next(1);
        assert!(embedder.embed("x").await.unwrap_err().is_service_failure());
        assert!(embedder.embed("x").await.is_ok());
        assert_eq!(embedder.call_count(), 2);
    }
}
