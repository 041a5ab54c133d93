//! 会话表：按会话 ID 持有各自的 [`HierarchicalMemoryManager`]
//!
//! 会话在首次访问时创建，`end_session` 或空闲超时后移除。
//! 每个会话一把 `tokio::sync::Mutex`，同一会话同一时刻只处理一轮对话。

use crate::config::HierarchyConfig;
use crate::error::{MemoryError, Result};
use crate::memory::hierarchical::HierarchicalMemoryManager;
use crate::memory::manager::MemoryManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type SessionHandle = Arc<tokio::sync::Mutex<HierarchicalMemoryManager>>;

struct Entry {
    handle: SessionHandle,
    last_access: Instant,
}

pub struct SessionRegistry {
    long_term: Arc<MemoryManager>,
    config: HierarchyConfig,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new(long_term: Arc<MemoryManager>, config: HierarchyConfig, idle_timeout: Duration) -> Self {
        Self {
            long_term,
            config,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_or_create(&self, session_id: &str) -> Result<SessionHandle> {
        if session_id.trim().is_empty() {
            return Err(MemoryError::empty_text("session id"));
        }
        let mut sessions = self.lock();
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| {
            info!(session_id, "🆕 创建会话记忆");
            Entry {
                handle: Arc::new(tokio::sync::Mutex::new(HierarchicalMemoryManager::new(
                    session_id,
                    self.long_term.clone(),
                    self.config.clone(),
                ))),
                last_access: Instant::now(),
            }
        });
        entry.last_access = Instant::now();
        Ok(entry.handle.clone())
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let mut sessions = self.lock();
        sessions.get_mut(session_id).map(|entry| {
            entry.last_access = Instant::now();
            entry.handle.clone()
        })
    }

    /// 移除会话；只释放工作记忆与会话记忆，长期记忆保留
    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            info!(session_id, "👋 会话已结束");
        }
        removed
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 移除空闲超时且当前没有在处理对话的会话，返回移除数量
    pub fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|session_id, entry| {
            let idle = now.duration_since(entry.last_access) >= self.idle_timeout;
            let busy = entry.handle.try_lock().is_err();
            let reap = idle && !busy;
            if reap {
                debug!(session_id = %session_id, "🧹 回收空闲会话");
            }
            !reap
        });
        let reaped = before - sessions.len();
        if reaped > 0 {
            info!(reaped, remaining = sessions.len(), "🧹 空闲会话回收完成");
        }
        reaped
    }

    /// 后台定时回收，`cancel` 触发后退出
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                registry.reap_idle();
            }
            debug!("会话回收任务已停止");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;
    use crate::memory::judge::{ImportanceJudge, Judgement};
    use crate::memory::vector_store::VectorStore;
    use crate::resilience::CircuitBreaker;
    use crate::testing::{FlakyVectorDatabase, MockEmbedder};
    use async_trait::async_trait;

    struct NeverImportant;

    #[async_trait]
    impl ImportanceJudge for NeverImportant {
        async fn judge(&self, _message: &str) -> Result<Judgement> {
            Ok(Judgement::not_important())
        }
    }

    fn registry(idle_timeout: Duration) -> Arc<SessionRegistry> {
        let breaker = Arc::new(CircuitBreaker::new("vector_db", 5, Duration::from_secs(60)).unwrap());
        let store = Arc::new(VectorStore::new(
            Arc::new(FlakyVectorDatabase::new()),
            Arc::new(MockEmbedder::new(16)),
            breaker,
            "memories",
        ));
        let long_term = Arc::new(MemoryManager::new(store, Arc::new(NeverImportant)));
        Arc::new(SessionRegistry::new(long_term, HierarchyConfig::default(), idle_timeout))
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let registry = registry(Duration::from_secs(60));
        let a = registry.get_or_create("alice").unwrap();
        a.lock().await.add_message(&Message::user("hi"));

        let again = registry.get_or_create("alice").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(again.lock().await.session().turn_count(), 1);

        registry.get_or_create("bob").unwrap();
        assert_eq!(registry.session_ids(), vec!["alice", "bob"]);
        assert!(registry.get("carol").is_none());
        assert!(registry.get_or_create(" ").is_err());
    }

    #[tokio::test]
    async fn test_end_session_drops_tiers() {
        let registry = registry(Duration::from_secs(60));
        registry
            .get_or_create("alice")
            .unwrap()
            .lock()
            .await
            .add_message(&Message::user("hi"));

        assert!(registry.end_session("alice"));
        assert!(!registry.end_session("alice"));
        assert!(registry.is_empty());

        let fresh = registry.get_or_create("alice").unwrap();
        assert_eq!(fresh.lock().await.session().turn_count(), 0);
    }

    #[tokio::test]
    async fn test_reap_idle_skips_busy_sessions() {
        let registry = registry(Duration::from_millis(10));
        let busy = registry.get_or_create("busy").unwrap();
        registry.get_or_create("idle").unwrap();

        let guard = busy.lock().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.reap_idle(), 1);
        assert_eq!(registry.session_ids(), vec!["busy"]);

        drop(guard);
        assert_eq!(registry.reap_idle(), 1);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_recently_used_sessions_survive() {
        let registry = registry(Duration::from_secs(60));
        registry.get_or_create("alice").unwrap();
        assert_eq!(registry.reap_idle(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reaper_task_stops_on_cancel() {
        let registry = registry(Duration::from_millis(5));
        registry.get_or_create("alice").unwrap();

        let cancel = CancellationToken::new();
        let task = registry.spawn_reaper(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }
}
