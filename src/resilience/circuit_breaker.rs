//! 熔断器
//!
//! 三态状态机，包裹任意一次外部调用：
//!
//! ```text
//!            失败次数达到阈值
//!   Closed ───────────────────▶ Open
//!     ▲                          │ 冷却时间已过
//!     │ 试探成功                  ▼
//!     └──────────────────── HalfOpen ──试探失败──▶ Open
//! ```
//!
//! - **Closed**：正常放行。成功不改变计数；匹配的失败累加 `failure_count`
//! - **Open**：直接返回 [`CircuitBreakerOpen`]，不执行被包裹的调用
//! - **HalfOpen**：只放行一次试探调用，其余并发调用按 Open 拒绝
//!
//! 不满足失败判定（`expected_failure`）的错误原样透传，不影响状态。
//! 调用 future 在完成前被丢弃（取消 / 超时）时，既不算成功也不算失败。

use crate::error::{CircuitBreakerOpen, MemoryError, Result, ValidationError};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 判定某个错误是否计入熔断失败次数
pub type FailurePredicate = Arc<dyn Fn(&MemoryError) -> bool + Send + Sync>;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// 熔断器状态快照，供健康检查 / 管理接口只读展示
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    /// 距最近一次记录失败的秒数（从未打开过则为 None）
    pub seconds_since_last_failure: Option<f64>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    /// HalfOpen 下是否已有试探调用在执行
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// 熔断器
///
/// 同一个外部服务全进程共享一个实例（`Arc<CircuitBreaker>`）。
/// 内部状态由 `std::sync::Mutex` 保护，锁从不跨越 `.await`。
///
/// # 示例
///
/// ```rust,no_run
/// use echo_memory::resilience::CircuitBreaker;
/// use std::time::Duration;
///
/// # async fn example() -> echo_memory::error::Result<()> {
/// let breaker = CircuitBreaker::builder("qdrant")
///     .failure_threshold(3)
///     .recovery_timeout(Duration::from_secs(30))
///     .build()?;
///
/// let value = breaker.call_async(|| async { Ok(42) }).await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    is_failure: FailurePredicate,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .finish()
    }
}

impl CircuitBreaker {
    /// 使用默认失败判定（[`MemoryError::is_service_failure`]）创建熔断器
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Result<Self> {
        Self::builder(name)
            .failure_threshold(failure_threshold)
            .recovery_timeout(recovery_timeout)
            .build()
    }

    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            name: name.into(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            is_failure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前状态（只读，不会触发 Open → HalfOpen 的迁移）
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs_f64(),
            seconds_since_last_failure: inner.last_failure_time.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// 强制回到 Closed 并清零计数，无论当前处于什么状态
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
        info!(breaker = %self.name, "🔄 熔断器已手动重置");
    }

    /// 同步调用
    pub fn call<T>(&self, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let permit = self.acquire()?;
        let outcome = work();
        permit.settle(outcome)
    }

    /// 异步调用
    ///
    /// 返回的 future 若在 `work` 完成前被丢弃，本次调用不计入成功或失败。
    pub async fn call_async<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.acquire()?;
        let outcome = work().await;
        permit.settle(outcome)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(&self) -> Result<CallPermit<'_>> {
        let admission = self.admit()?;
        Ok(CallPermit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn admit(&self) -> std::result::Result<Admission, CircuitBreakerOpen> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(breaker = %self.name, "🟡 冷却结束，进入 HALF_OPEN 试探");
                    Ok(Admission::Trial)
                } else {
                    Err(self.open_error(self.recovery_timeout - elapsed))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.open_error(Duration::ZERO))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn open_error(&self, retry_after: Duration) -> CircuitBreakerOpen {
        debug!(breaker = %self.name, "⛔ 熔断器打开，拒绝调用");
        CircuitBreakerOpen {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, admission: Admission) {
        if admission != Admission::Trial {
            return;
        }
        let mut inner = self.lock();
        inner.trial_in_flight = false;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            info!(breaker = %self.name, "🟢 试探成功，熔断器恢复 CLOSED");
        }
    }

    fn on_failure(&self, admission: Admission, err: &MemoryError) {
        let mut inner = self.lock();
        if admission == Admission::Trial {
            inner.trial_in_flight = false;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        if inner.failure_count >= self.failure_threshold {
            let reopened = inner.state != CircuitState::Closed;
            inner.state = CircuitState::Open;
            inner.last_failure_time = Some(Instant::now());
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                reopened,
                error = %err,
                "🔴 熔断器打开"
            );
        } else {
            debug!(
                breaker = %self.name,
                failures = inner.failure_count,
                threshold = self.failure_threshold,
                "记录一次失败"
            );
        }
    }

    fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }
}

/// 一次被放行的调用；未结算即被丢弃时归还试探名额
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle<T>(mut self, outcome: Result<T>) -> Result<T> {
        self.settled = true;
        match &outcome {
            Ok(_) => self.breaker.on_success(self.admission),
            Err(e) if (self.breaker.is_failure)(e) => self.breaker.on_failure(self.admission, e),
            Err(_) => {
                if self.admission == Admission::Trial {
                    self.breaker.release_trial();
                }
            }
        }
        outcome
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

fn default_failure_predicate() -> FailurePredicate {
    Arc::new(|err: &MemoryError| err.is_service_failure())
}

/// [`CircuitBreaker`] 构建器
pub struct CircuitBreakerBuilder {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    is_failure: Option<FailurePredicate>,
}

impl CircuitBreakerBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// 自定义哪些错误计入失败（默认只统计外部服务故障）
    pub fn expected_failure(
        mut self,
        predicate: impl Fn(&MemoryError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_failure = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Result<CircuitBreaker> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::InvalidArgument {
                name: "failure_threshold".to_string(),
                message: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.recovery_timeout.is_zero() {
            return Err(ValidationError::InvalidArgument {
                name: "recovery_timeout".to_string(),
                message: "must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(CircuitBreaker {
            name: self.name,
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            is_failure: self.is_failure.unwrap_or_else(default_failure_predicate),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LlmError, VectorDbError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service_error() -> MemoryError {
        MemoryError::VectorDb(VectorDbError::NetworkError("connection refused".into()))
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker.call_async(|| async { Err::<(), _>(service_error()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_skips_work() {
        let breaker = CircuitBreaker::new("qdrant", 3, Duration::from_secs(60)).unwrap();
        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        for _ in 0..5 {
            let err = breaker
                .call_async(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap_err();
            assert!(err.is_circuit_open());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0, "打开状态下不应执行被包裹的调用");
    }

    #[tokio::test]
    async fn test_threshold_three_recovery_one_second_scenario() {
        let breaker = CircuitBreaker::new("llm", 3, Duration::from_secs(1)).unwrap();
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let fourth = breaker.call_async(|| async { Ok("too early") }).await;
        assert!(matches!(fourth, Err(MemoryError::CircuitOpen(_))));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let value = breaker.call_async(|| async { Ok("recovered") }).await.unwrap();
        assert_eq!(value, "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("embedding", 2, Duration::from_millis(50)).unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let err = fail(&breaker).await.unwrap_err();
        assert!(!err.is_circuit_open(), "试探调用应真正执行");
        assert_eq!(breaker.state(), CircuitState::Open);

        // 冷却时间被刷新，立即调用仍被拒绝
        let err = breaker.call_async(|| async { Ok(()) }).await.unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test]
    async fn test_non_matching_errors_pass_through() {
        let breaker = CircuitBreaker::new("qdrant", 1, Duration::from_secs(60)).unwrap();
        for _ in 0..5 {
            let err = breaker
                .call_async(|| async { Err::<(), _>(MemoryError::empty_text("query")) })
                .await
                .unwrap_err();
            assert!(matches!(err, MemoryError::Validation(_)));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_expected_failure() {
        let breaker = CircuitBreaker::builder("judge")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(60))
            .expected_failure(|e| matches!(e, MemoryError::Llm(LlmError::EmptyResponse)))
            .build()
            .unwrap();

        breaker
            .call_async(|| async { Err::<(), _>(service_error()) })
            .await
            .unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker
            .call_async(|| async { Err::<(), _>(MemoryError::Llm(LlmError::EmptyResponse)) })
            .await
            .unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_in_closed_keeps_count() {
        let breaker = CircuitBreaker::new("qdrant", 3, Duration::from_secs(60)).unwrap();
        fail(&breaker).await.unwrap_err();
        breaker.call_async(|| async { Ok(()) }).await.unwrap();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.failure_count(), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::new("qdrant", 1, Duration::from_secs(600)).unwrap();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.call_async(|| async { Ok(1) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_trial_is_not_counted() {
        let breaker = CircuitBreaker::new("qdrant", 1, Duration::from_millis(20)).unwrap();
        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let slow = breaker.call_async(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), slow).await.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.failure_count(), 1);

        // 试探名额已归还，下一次调用可以继续试探
        breaker.call_async(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_allows_single_trial() {
        let breaker = Arc::new(CircuitBreaker::new("qdrant", 1, Duration::from_millis(10)).unwrap());
        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call_async(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let err = breaker.call_async(|| async { Ok(()) }).await.unwrap_err();
        assert!(err.is_circuit_open(), "试探进行中，其他调用应被拒绝");

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_sync_call_and_snapshot() {
        let breaker = CircuitBreaker::new("llm", 2, Duration::from_secs(5)).unwrap();
        assert_eq!(breaker.call(|| Ok(7)).unwrap(), 7);
        breaker
            .call(|| Err::<(), _>(MemoryError::Llm(LlmError::EmptyResponse)))
            .unwrap_err();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.name, "llm");
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.failure_threshold, 2);
        assert!(snapshot.seconds_since_last_failure.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "CLOSED");
    }

    #[test]
    fn test_builder_rejects_invalid_parameters() {
        assert!(CircuitBreaker::new("x", 0, Duration::from_secs(1)).is_err());
        assert!(CircuitBreaker::new("x", 1, Duration::ZERO).is_err());
    }
}
