//! etcd 服务注册实现
//!
//! 实例写入 `/services/{service_name}/{instance_id}`，值为 JSON 编码的 [`ServiceInfo`]，
//! 绑定 TTL 租约。后台会话任务负责续约；续约失败时重新注册，注册失败时按退避策略重试。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::trait_def::ServiceRegistry;
use crate::config::EtcdConfig;
use crate::discovery::backend::{CoordinationStore, EtcdStore, LeaseId, instance_key};
use crate::error::{RegistryError, Result};
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::types::ServiceInfo;

/// 注册最终失败回调
pub type RegisterFailedCallback = Arc<dyn Fn(RegistryError) + Send + Sync>;

/// 最小续约间隔
const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// 注册选项
#[derive(Clone)]
pub struct RegistrationOptions {
    /// 是否启用注册重试
    pub enable_retry: bool,

    /// 退避策略（`max_retries = 0` 表示无限重试）
    pub retry: ExponentialBackoff,

    /// 有限重试耗尽后调用一次
    pub on_register_failed: Option<RegisterFailedCallback>,
}

impl RegistrationOptions {
    /// 从 etcd 配置构建
    pub fn from_etcd_config(config: &EtcdConfig) -> Self {
        Self {
            enable_retry: config.enable_retry,
            retry: config.retry_policy(),
            on_register_failed: None,
        }
    }

    pub fn with_retry(mut self, retry: ExponentialBackoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.enable_retry = false;
        self
    }

    /// 设置注册失败回调
    pub fn on_register_failed<F>(mut self, callback: F) -> Self
    where
        F: Fn(RegistryError) + Send + Sync + 'static,
    {
        self.on_register_failed = Some(Arc::new(callback));
        self
    }
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            enable_retry: true,
            retry: ExponentialBackoff::default(),
            on_register_failed: None,
        }
    }
}

impl fmt::Debug for RegistrationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationOptions")
            .field("enable_retry", &self.enable_retry)
            .field("retry", &self.retry)
            .field("on_register_failed", &self.on_register_failed.is_some())
            .finish()
    }
}

/// 续约间隔：`max(ttl / 3, 1s)`
pub fn keep_alive_interval(ttl_secs: u64) -> Duration {
    (Duration::from_secs(ttl_secs) / 3).max(MIN_KEEP_ALIVE_INTERVAL)
}

/// 当前注册
#[derive(Debug, Clone)]
struct Registration {
    info: ServiceInfo,
    key: String,
    lease: Option<LeaseId>,
}

/// 会话任务的下一步
enum Phase {
    KeepAlive,
    /// 重新注册；携带上一次失败（有则先退避）
    Register(Option<RegistryError>),
}

struct Inner {
    store: Arc<dyn CoordinationStore>,
    options: RegistrationOptions,
    registered: AtomicBool,
    state: Mutex<Option<Registration>>,
}

impl Inner {
    fn current(&self) -> Option<Registration> {
        self.state.lock().clone()
    }

    /// 申请租约并写入实例
    async fn publish(&self) -> Result<LeaseId> {
        let registration = self.current().ok_or(RegistryError::NotRegistered)?;
        let value = serde_json::to_vec(&registration.info)?;

        let lease = self
            .store
            .grant_lease(registration.info.ttl as i64)
            .await?;
        if let Some(current) = self.state.lock().as_mut() {
            current.lease = Some(lease);
        }
        if let Err(e) = self.store.put(&registration.key, value, Some(lease)).await {
            if let Some(current) = self.state.lock().as_mut() {
                current.lease = None;
            }
            if let Err(revoke_err) = self.store.revoke_lease(lease).await {
                debug!(lease_id = lease, error = %revoke_err, "Failed to revoke unused lease");
            }
            return Err(e.into());
        }

        self.registered.store(true, Ordering::SeqCst);
        info!(
            service = %registration.info.service_name,
            instance_id = %registration.info.instance_id,
            endpoint = %registration.info.endpoint(),
            lease_id = lease,
            "✅ Service registered"
        );
        Ok(lease)
    }

    /// 按退避策略重试注册
    async fn register_with_retry(&self, mut last_error: Option<RegistryError>) -> Result<LeaseId> {
        let policy = &self.options.retry;
        let mut retries = 0u32;

        loop {
            if let Some(err) = last_error.take() {
                if !self.options.enable_retry || !policy.should_retry(retries) {
                    return Err(RegistryError::MaxRetriesExceeded {
                        attempts: retries + 1,
                        last_error: err.to_string(),
                    });
                }
                let delay = policy.backoff_duration(retries);
                warn!(
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Service registration failed, retrying"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            }

            match self.publish().await {
                Ok(lease) => return Ok(lease),
                Err(RegistryError::NotRegistered) => return Err(RegistryError::NotRegistered),
                Err(e) => last_error = Some(e),
            }
        }
    }

    /// 周期续约，直到失败或注册被撤销
    ///
    /// 返回 None 表示注册已被撤销，任务应退出。
    async fn keep_alive(&self) -> Option<RegistryError> {
        loop {
            let registration = self.current()?;
            tokio::time::sleep(keep_alive_interval(registration.info.ttl)).await;

            let registration = self.current()?;
            let Some(lease) = registration.lease else {
                return Some(RegistryError::KeepAliveFailed("no active lease".to_string()));
            };
            match self.store.keep_alive(lease).await {
                Ok(()) => debug!(lease_id = lease, "Lease keep-alive ok"),
                Err(e) => {
                    let err = RegistryError::from(e);
                    warn!(
                        service = %registration.info.service_name,
                        lease_id = lease,
                        error = %err,
                        "Lease keep-alive failed, re-registering"
                    );
                    return Some(err);
                }
            }
        }
    }

    /// 后台会话：注册（可能需要重试）后持续续约
    async fn run_session(self: Arc<Self>, mut phase: Phase) {
        loop {
            if let Phase::Register(last_error) = phase {
                match self.register_with_retry(last_error).await {
                    Ok(_) => {}
                    Err(RegistryError::NotRegistered) => return,
                    Err(err) => {
                        self.fail(err);
                        return;
                    }
                }
            }

            match self.keep_alive().await {
                Some(_) => {
                    self.registered.store(false, Ordering::SeqCst);
                    phase = Phase::Register(None);
                }
                None => return,
            }
        }
    }

    /// 重试耗尽：清除注册状态并回调一次
    fn fail(&self, err: RegistryError) {
        self.registered.store(false, Ordering::SeqCst);
        let registration = self.state.lock().take();
        error!(
            service = registration.as_ref().map(|r| r.info.service_name.as_str()).unwrap_or(""),
            error = %err,
            "❌ Service registration gave up"
        );
        if let Some(callback) = &self.options.on_register_failed {
            callback(err);
        }
    }
}

/// etcd 服务注册
pub struct EtcdRegistry {
    inner: Arc<Inner>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl EtcdRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, options: RegistrationOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                options,
                registered: AtomicBool::new(false),
                state: Mutex::new(None),
            }),
            session: Mutex::new(None),
        }
    }

    /// 连接 etcd 并按配置创建注册器
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let store = EtcdStore::connect(config).await?;
        Ok(Self::new(
            Arc::new(store),
            RegistrationOptions::from_etcd_config(config),
        ))
    }

    /// 当前租约 ID
    pub fn lease_id(&self) -> Option<LeaseId> {
        self.inner.state.lock().as_ref().and_then(|r| r.lease)
    }

    /// 当前注册信息
    pub fn service_info(&self) -> Option<ServiceInfo> {
        self.inner.current().map(|r| r.info)
    }

    fn spawn_session(&self, phase: Phase) {
        let handle = tokio::spawn(self.inner.clone().run_session(phase));
        if let Some(previous) = self.session.lock().replace(handle) {
            previous.abort();
        }
    }

    fn abort_session(&self) {
        if let Some(handle) = self.session.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ServiceRegistry for EtcdRegistry {
    async fn register(&self, mut info: ServiceInfo) -> Result<()> {
        info.validate()?;

        {
            let mut state = self.inner.state.lock();
            if state.is_some() {
                return Err(RegistryError::AlreadyRegistered);
            }
            *state = Some(Registration {
                key: instance_key(&info.service_name, &info.instance_id),
                info,
                lease: None,
            });
        }

        match self.inner.publish().await {
            Ok(_) => {
                self.spawn_session(Phase::KeepAlive);
                Ok(())
            }
            Err(err) if self.inner.options.enable_retry => {
                warn!(error = %err, "Initial registration failed, retrying in background");
                self.spawn_session(Phase::Register(Some(err)));
                Ok(())
            }
            Err(err) => {
                self.inner.state.lock().take();
                Err(err)
            }
        }
    }

    async fn deregister(&self) -> Result<()> {
        self.abort_session();
        self.inner.registered.store(false, Ordering::SeqCst);

        let registration = self
            .inner
            .state
            .lock()
            .take()
            .ok_or(RegistryError::NotRegistered)?;

        if let Some(lease) = registration.lease {
            self.inner.store.revoke_lease(lease).await?;
        }
        self.inner.store.delete(&registration.key).await?;

        info!(
            service = %registration.info.service_name,
            instance_id = %registration.info.instance_id,
            "Service deregistered"
        );
        Ok(())
    }

    async fn update_metadata(&self, metadata: HashMap<String, String>) -> Result<()> {
        let registration = {
            let mut state = self.inner.state.lock();
            let current = state.as_mut().ok_or(RegistryError::NotRegistered)?;
            current.info.metadata.extend(metadata);
            current.clone()
        };

        // 尚未写入成功时只更新本地，下次注册生效
        if self.is_registered() {
            if let Some(lease) = registration.lease {
                let value = serde_json::to_vec(&registration.info)?;
                self.inner
                    .store
                    .put(&registration.key, value, Some(lease))
                    .await?;
            }
        }

        debug!(
            service = %registration.info.service_name,
            instance_id = %registration.info.instance_id,
            "Service metadata updated"
        );
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        match self.deregister().await {
            Ok(()) | Err(RegistryError::NotRegistered) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for EtcdRegistry {
    fn drop(&mut self) {
        self.abort_session();
    }
}
