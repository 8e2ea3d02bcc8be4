//! 注册管理器
//!
//! 根据 [`RegistryConfig`] 构建本实例的注册信息，注册前先做一次健康检查。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::etcd::{EtcdRegistry, RegistrationOptions};
use super::trait_def::ServiceRegistry;
use crate::config::RegistryConfig;
use crate::discovery::EtcdStore;
use crate::error::{RegistryError, Result};
use crate::health::{HealthChecker, HealthStatus, NoopHealthChecker};
use crate::types::ServiceInfo;

/// 注册前健康检查的默认超时
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// 注册管理器
pub struct RegistryManager {
    config: RegistryConfig,
    registry: Arc<dyn ServiceRegistry>,
    health_checker: Arc<dyn HealthChecker>,
    health_check_timeout: Duration,
}

impl RegistryManager {
    /// 使用已构建的注册器创建管理器（默认健康检查始终健康）
    pub fn new(config: RegistryConfig, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            config,
            registry,
            health_checker: Arc::new(NoopHealthChecker),
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }

    /// 按配置连接 etcd 并创建管理器
    pub async fn connect(config: RegistryConfig) -> Result<Self> {
        let registry = EtcdRegistry::connect(&config.etcd).await?;
        Ok(Self::new(config, Arc::new(registry)))
    }

    /// 按配置创建 etcd 注册器，并附带注册失败回调
    pub async fn connect_with_options(
        config: RegistryConfig,
        options: RegistrationOptions,
    ) -> Result<Self> {
        let store = EtcdStore::connect(&config.etcd).await?;
        let registry = EtcdRegistry::new(Arc::new(store), options);
        Ok(Self::new(config, Arc::new(registry)))
    }

    pub fn with_health_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.health_checker = checker;
        self
    }

    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 由配置构建注册信息
    ///
    /// `address` 必须是 `host:port`。
    pub fn service_info(&self) -> Result<ServiceInfo> {
        let (host, port) = self
            .config
            .address
            .trim()
            .rsplit_once(':')
            .ok_or(RegistryError::InvalidAddress)?;
        let port: u32 = port.parse().map_err(|_| RegistryError::InvalidPort(0))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let mut info = ServiceInfo::new(self.config.service_name.clone(), host, port)
            .with_protocol(self.config.protocol.clone())
            .with_version(self.config.version.clone())
            .with_ttl(self.config.ttl.as_secs());
        info.metadata = self.config.metadata.clone();
        info.validate()?;
        Ok(info)
    }

    /// 健康检查，带超时
    pub async fn check_health(&self) -> Result<()> {
        match tokio::time::timeout(self.health_check_timeout, self.health_checker.check()).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::HealthCheckTimeout(self.health_check_timeout)),
        }
    }

    /// 注册本实例；配置未启用时直接返回
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Service registry disabled, skipping registration");
            return Ok(());
        }

        let info = self.service_info()?;
        if let Err(e) = self.check_health().await {
            warn!(service = %info.service_name, error = %e, "Health check failed, not registering");
            return Err(e);
        }

        self.registry.register(info).await
    }

    /// 注销本实例；未注册时返回 Ok
    pub async fn stop(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.registry.close().await
    }

    pub async fn update_metadata(&self, metadata: HashMap<String, String>) -> Result<()> {
        self.registry.update_metadata(metadata).await
    }

    pub fn is_registered(&self) -> bool {
        self.registry.is_registered()
    }

    /// 健康检查提供者报告的状态
    pub fn health(&self) -> HealthStatus {
        self.health_checker.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MemoryStore;
    use crate::discovery::backend::instance_key;
    use async_trait::async_trait;

    struct FailingChecker;

    #[async_trait]
    impl HealthChecker for FailingChecker {
        async fn check(&self) -> Result<()> {
            Err(RegistryError::HealthCheckFailed("db down".to_string()))
        }

        fn status(&self) -> HealthStatus {
            HealthStatus::unhealthy(&RegistryError::HealthCheckFailed("db down".to_string()))
        }
    }

    struct SlowChecker;

    #[async_trait]
    impl HealthChecker for SlowChecker {
        async fn check(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        fn status(&self) -> HealthStatus {
            HealthStatus::default()
        }
    }

    fn config() -> RegistryConfig {
        RegistryConfig {
            enabled: true,
            service_name: "orders".to_string(),
            address: "10.0.0.5:7000".to_string(),
            version: "1.2.0".to_string(),
            metadata: HashMap::from([("zone".to_string(), "a".to_string())]),
            ..Default::default()
        }
    }

    fn manager(store: &MemoryStore, config: RegistryConfig) -> RegistryManager {
        let registry = EtcdRegistry::new(
            Arc::new(store.clone()),
            RegistrationOptions::default().without_retry(),
        );
        RegistryManager::new(config, Arc::new(registry))
    }

    #[test]
    fn test_service_info_from_config() {
        let manager = manager(&MemoryStore::new(), config());
        let info = manager.service_info().unwrap();
        assert_eq!(info.service_name, "orders");
        assert_eq!(info.address, "10.0.0.5");
        assert_eq!(info.port, 7000);
        assert_eq!(info.version, "1.2.0");
        assert_eq!(info.ttl, 10);
        assert_eq!(info.instance_id, "orders-10.0.0.5-7000");
    }

    #[test]
    fn test_service_info_rejects_bad_address() {
        let store = MemoryStore::new();
        let bad = |address: &str| {
            let cfg = RegistryConfig {
                address: address.to_string(),
                ..config()
            };
            manager(&store, cfg).service_info().unwrap_err()
        };
        assert_eq!(bad("10.0.0.5"), RegistryError::InvalidAddress);
        assert_eq!(bad("10.0.0.5:http"), RegistryError::InvalidPort(0));
        assert_eq!(bad("10.0.0.5:70000"), RegistryError::InvalidPort(70000));
        assert_eq!(bad(":80"), RegistryError::InvalidAddress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let store = MemoryStore::new();
        let manager = manager(&store, config());

        manager.start().await.unwrap();
        assert!(manager.is_registered());
        assert!(store.get(&instance_key("orders", "orders-10.0.0.5-7000")).is_some());
        assert!(manager.health().healthy);

        manager.stop().await.unwrap();
        assert!(!manager.is_registered());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let store = MemoryStore::new();
        let cfg = RegistryConfig {
            enabled: false,
            ..config()
        };
        let manager = manager(&store, cfg);
        manager.start().await.unwrap();
        assert!(!manager.is_registered());
        assert!(store.is_empty());
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unhealthy_instance_not_registered() {
        let store = MemoryStore::new();
        let manager = manager(&store, config()).with_health_checker(Arc::new(FailingChecker));

        let err = manager.start().await.unwrap_err();
        assert_eq!(err, RegistryError::HealthCheckFailed("db down".to_string()));
        assert!(store.is_empty());
        assert!(!manager.health().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_timeout() {
        let store = MemoryStore::new();
        let manager = manager(&store, config())
            .with_health_checker(Arc::new(SlowChecker))
            .with_health_check_timeout(Duration::from_secs(1));

        assert_eq!(
            manager.start().await,
            Err(RegistryError::HealthCheckTimeout(Duration::from_secs(1)))
        );
        assert!(!manager.is_registered());
    }
}
