//! 熔断器模块
//!
//! 每个资源键（通常是服务名）独立维护一个 [`CircuitStateMachine`]，
//! 一个资源的失败不会影响其他资源。
//!
//! ## 状态迁移
//!
//! ```text
//! Closed   -> Open     : 连续失败达到 failure_threshold
//! Open     -> HalfOpen : 距进入 Open 超过 timeout 后的下一次请求
//! HalfOpen -> Closed   : 连续成功达到 success_threshold
//! HalfOpen -> Open     : 任意一次失败
//! ```
//!
//! 状态表按资源键哈希分片，每个分片一把读写锁；`shards = 1` 时退化为全局一把锁。

pub mod state;

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;

pub use state::{Admission, CircuitState, CircuitStateMachine, CircuitStats, Transition};

/// 被熔断器保护的操作
///
/// 熔断器拒绝请求时调用 `fallback`，不会调用 `execute`。
#[async_trait]
pub trait ProtectedOperation: Send + Sync {
    type Output: Send;
    type Error: Send;

    async fn execute(&self) -> Result<Self::Output, Self::Error>;

    async fn fallback(&self, rejection: Rejection) -> Result<Self::Output, Self::Error>;
}

/// 熔断器拒绝请求的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub resource: String,
    pub state: CircuitState,
}

impl Rejection {
    pub fn into_error<E>(self) -> CircuitBreakerError<E> {
        match self.state {
            CircuitState::HalfOpen => CircuitBreakerError::HalfOpenLimitReached {
                resource: self.resource,
            },
            _ => CircuitBreakerError::Open {
                resource: self.resource,
            },
        }
    }
}

type Shard = RwLock<HashMap<String, CircuitStateMachine>>;

/// 按资源键隔离的熔断器
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    shards: Box<[Shard]>,
}

impl CircuitBreaker {
    pub fn new(mut config: CircuitBreakerConfig) -> Self {
        let budget = config.effective_half_open_requests();
        if budget != config.half_open_requests {
            warn!(
                half_open_requests = config.half_open_requests,
                success_threshold = config.success_threshold,
                adjusted = budget,
                "half_open_requests raised to cover success_threshold"
            );
            config.half_open_requests = budget;
        }

        let shard_count = config.shards.max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        info!(
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout = ?config.timeout,
            half_open_requests = config.half_open_requests,
            shards = shard_count,
            "Circuit breaker initialized"
        );

        Self { config, shards }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn shard(&self, resource: &str) -> &Shard {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let mut hasher = DefaultHasher::new();
        resource.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// 对资源的状态机执行一次修改，资源首次出现时以 Closed 创建
    fn update<R>(
        &self,
        resource: &str,
        f: impl FnOnce(&mut CircuitStateMachine, &CircuitBreakerConfig, Instant) -> R,
    ) -> R {
        let now = Instant::now();
        let mut shard = self.shard(resource).write();
        let machine = shard
            .entry(resource.to_string())
            .or_insert_with(|| CircuitStateMachine::new(now));
        f(machine, &self.config, now)
    }

    fn log_transition(resource: &str, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        match to {
            CircuitState::Open => {
                info!(resource = %resource, from = %from, "⚡ Circuit opened")
            }
            CircuitState::HalfOpen => {
                debug!(resource = %resource, from = %from, "Circuit half-open, probing")
            }
            CircuitState::Closed => {
                info!(resource = %resource, from = %from, "✅ Circuit closed")
            }
        }
    }

    /// 请求准入，拒绝时返回原因
    pub fn acquire(&self, resource: &str) -> Result<(), Rejection> {
        let (admission, transition) =
            self.update(resource, |machine, config, now| machine.try_acquire(config, now));
        Self::log_transition(resource, transition);

        let state = match admission {
            Admission::Allowed => return Ok(()),
            Admission::RejectedOpen => CircuitState::Open,
            Admission::RejectedHalfOpen => CircuitState::HalfOpen,
        };
        debug!(resource = %resource, state = %state, "Circuit breaker rejected request");
        Err(Rejection {
            resource: resource.to_string(),
            state,
        })
    }

    /// 在熔断保护下执行 `f`，并根据结果记录成功/失败
    pub async fn call<F, Fut, T, E>(&self, resource: &str, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire(resource).map_err(Rejection::into_error)?;

        match f().await {
            Ok(value) => {
                self.record_success(resource);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(resource);
                Err(CircuitBreakerError::Execution(e))
            }
        }
    }

    /// 执行受保护操作；被拒绝时走 `fallback`
    pub async fn execute<O>(&self, resource: &str, operation: &O) -> Result<O::Output, O::Error>
    where
        O: ProtectedOperation + ?Sized,
    {
        if let Err(rejection) = self.acquire(resource) {
            return operation.fallback(rejection).await;
        }

        match operation.execute().await {
            Ok(value) => {
                self.record_success(resource);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(resource);
                Err(e)
            }
        }
    }

    pub fn record_success(&self, resource: &str) {
        let transition = self.update(resource, |machine, config, now| machine.on_success(config, now));
        Self::log_transition(resource, transition);
    }

    pub fn record_failure(&self, resource: &str) {
        let transition = self.update(resource, |machine, config, now| machine.on_failure(config, now));
        Self::log_transition(resource, transition);
    }

    /// 当前状态；未出现过的资源为 Closed
    ///
    /// 只读，不会触发 Open -> HalfOpen 迁移。
    pub fn get_state(&self, resource: &str) -> CircuitState {
        self.shard(resource)
            .read()
            .get(resource)
            .map(CircuitStateMachine::state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn stats(&self, resource: &str) -> Option<CircuitStats> {
        self.shard(resource).read().get(resource).map(CircuitStateMachine::stats)
    }

    /// 重置资源为初始的 Closed 状态
    pub fn reset(&self, resource: &str) {
        if self.shard(resource).write().remove(resource).is_some() {
            info!(resource = %resource, "Circuit breaker reset");
        }
    }

    pub fn reset_all(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    /// 已跟踪的资源键
    pub fn resources(&self) -> Vec<String> {
        let mut resources: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        resources.sort();
        resources
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker(timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout,
            half_open_requests: 2,
            shards: 4,
        })
    }

    async fn fail(cb: &CircuitBreaker, resource: &str) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(resource, || async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker, resource: &str) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(resource, || async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(Duration::from_secs(60));

        for _ in 0..2 {
            assert!(matches!(fail(&cb, "orders").await, Err(CircuitBreakerError::Execution("boom"))));
        }
        assert_eq!(cb.get_state("orders"), CircuitState::Closed);

        let _ = fail(&cb, "orders").await;
        assert_eq!(cb.get_state("orders"), CircuitState::Open);

        let err = succeed(&cb, "orders").await.unwrap_err();
        assert_eq!(err.to_string(), "circuit open for resource orders");
    }

    #[tokio::test]
    async fn test_interleaved_success_resets_count() {
        let cb = breaker(Duration::from_secs(60));

        let _ = fail(&cb, "orders").await;
        let _ = fail(&cb, "orders").await;
        succeed(&cb, "orders").await.unwrap();
        let _ = fail(&cb, "orders").await;
        let _ = fail(&cb, "orders").await;

        assert_eq!(cb.get_state("orders"), CircuitState::Closed);
        assert_eq!(cb.stats("orders").unwrap().failure_count, 2);
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let cb = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure("orders");
        }
        assert_eq!(cb.get_state("orders"), CircuitState::Open);
        assert_eq!(cb.get_state("users"), CircuitState::Closed);
        succeed(&cb, "users").await.unwrap();
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_close() {
        let cb = breaker(Duration::from_millis(50));
        for _ in 0..3 {
            cb.record_failure("orders");
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        // 状态查询不会触发迁移
        assert_eq!(cb.get_state("orders"), CircuitState::Open);

        succeed(&cb, "orders").await.unwrap();
        assert_eq!(cb.get_state("orders"), CircuitState::HalfOpen);
        succeed(&cb, "orders").await.unwrap();
        assert_eq!(cb.get_state("orders"), CircuitState::Closed);

        let stats = cb.stats("orders").unwrap();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.half_open_attempts, 0);
    }

    #[tokio::test]
    async fn test_default_config_recovers_to_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            timeout: Duration::from_millis(50),
            ..Default::default()
        });
        for _ in 0..5 {
            let _ = fail(&cb, "orders").await;
        }
        assert_eq!(cb.get_state("orders"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        succeed(&cb, "orders").await.unwrap();
        assert_eq!(cb.get_state("orders"), CircuitState::HalfOpen);
        succeed(&cb, "orders").await.unwrap();
        assert_eq!(cb.get_state("orders"), CircuitState::Closed);
        succeed(&cb, "orders").await.unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_half_open_budget_is_raised() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 3,
            timeout: Duration::from_millis(30),
            half_open_requests: 1,
            shards: 1,
        });
        assert_eq!(cb.config().half_open_requests, 3);

        cb.record_failure("orders");
        tokio::time::sleep(Duration::from_millis(40)).await;
        for _ in 0..3 {
            succeed(&cb, "orders").await.unwrap();
        }
        assert_eq!(cb.get_state("orders"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(Duration::from_millis(30));
        for _ in 0..3 {
            cb.record_failure("orders");
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let _ = fail(&cb, "orders").await;
        assert_eq!(cb.get_state("orders"), CircuitState::Open);
        assert!(matches!(
            succeed(&cb, "orders").await,
            Err(CircuitBreakerError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn test_half_open_budget() {
        let cb = breaker(Duration::from_millis(30));
        for _ in 0..3 {
            cb.record_failure("orders");
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.acquire("orders").is_ok());
        assert!(cb.acquire("orders").is_ok());
        let rejection = cb.acquire("orders").unwrap_err();
        assert_eq!(rejection.state, CircuitState::HalfOpen);
        assert!(matches!(
            rejection.into_error::<()>(),
            CircuitBreakerError::HalfOpenLimitReached { .. }
        ));
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure("orders");
        }
        cb.record_failure("users");
        assert_eq!(cb.resources(), vec!["orders".to_string(), "users".to_string()]);

        cb.reset("orders");
        assert_eq!(cb.get_state("orders"), CircuitState::Closed);
        assert!(cb.stats("orders").is_none());

        cb.reset_all();
        assert!(cb.resources().is_empty());
    }

    struct CountingOperation {
        fail: bool,
        executed: AtomicU32,
        fallbacks: AtomicU32,
    }

    #[async_trait]
    impl ProtectedOperation for CountingOperation {
        type Output = &'static str;
        type Error = String;

        async fn execute(&self) -> Result<Self::Output, Self::Error> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.fail { Err("down".to_string()) } else { Ok("primary") }
        }

        async fn fallback(&self, rejection: Rejection) -> Result<Self::Output, Self::Error> {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
            assert_eq!(rejection.resource, "export");
            Ok("fallback")
        }
    }

    #[tokio::test]
    async fn test_execute_routes_rejections_to_fallback() {
        let cb = breaker(Duration::from_secs(60));
        let op = Arc::new(CountingOperation {
            fail: true,
            executed: AtomicU32::new(0),
            fallbacks: AtomicU32::new(0),
        });

        for _ in 0..3 {
            assert!(cb.execute("export", op.as_ref()).await.is_err());
        }
        assert_eq!(cb.execute("export", op.as_ref()).await, Ok("fallback"));
        assert_eq!(op.executed.load(Ordering::SeqCst), 3);
        assert_eq!(op.fallbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_state() {
        let cb = Arc::new(breaker(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move {
                cb.record_failure("orders");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cb.get_state("orders"), CircuitState::Open);
    }
}
