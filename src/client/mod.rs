//! 客户端管理模块
//!
//! 把服务发现、负载均衡和熔断器组合起来，为一次调用选出一个实例。
//! 本模块只选择实例，不负责实际的 gRPC/HTTP 调用。

pub mod load_balancer;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::ClientConfig;
use crate::discovery::{ServiceDiscovery, ServiceInstance};
use crate::error::{CallError, ClientError, DiscoveryError};

pub use load_balancer::{
    LoadBalanceStrategy, LoadBalancer, RandomBalancer, RoundRobinBalancer, WeightedBalancer,
    new_load_balancer,
};

/// 客户端管理器
///
/// 熔断器按服务名记录状态。
#[derive(Clone)]
pub struct ClientManager {
    discovery: Arc<dyn ServiceDiscovery>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl ClientManager {
    /// 只使用服务发现（选择第一个候选实例，不熔断）
    pub fn new(discovery: Arc<dyn ServiceDiscovery>) -> Self {
        Self {
            discovery,
            load_balancer: None,
            circuit_breaker: None,
        }
    }

    pub fn builder(discovery: Arc<dyn ServiceDiscovery>) -> ClientManagerBuilder {
        ClientManagerBuilder {
            inner: Self::new(discovery),
        }
    }

    /// 按配置创建负载均衡器和熔断器
    pub fn from_config(discovery: Arc<dyn ServiceDiscovery>, config: &ClientConfig) -> Self {
        let mut builder =
            Self::builder(discovery).load_balancer(new_load_balancer(&config.load_balancer));
        if let Some(cb_config) = &config.circuit_breaker {
            builder = builder.circuit_breaker(Arc::new(CircuitBreaker::new(cb_config.clone())));
        }
        builder.build()
    }

    pub fn discovery(&self) -> &Arc<dyn ServiceDiscovery> {
        &self.discovery
    }

    pub fn load_balancer(&self) -> Option<&Arc<dyn LoadBalancer>> {
        self.load_balancer.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// 为一次调用选择实例
    ///
    /// 没有健康实例时退化为在全部实例中选择；只有服务没有任何实例时才失败。
    pub async fn select_instance(&self, service_name: &str) -> Result<ServiceInstance, ClientError> {
        let instances = self
            .discovery
            .discover(service_name)
            .await
            .map_err(ClientError::Discover)?;

        if instances.is_empty() {
            return Err(ClientError::NoAvailableInstances(service_name.to_string()));
        }

        let healthy: Vec<ServiceInstance> =
            instances.iter().filter(|i| i.healthy).cloned().collect();
        let candidates = if healthy.is_empty() {
            warn!(
                service = %service_name,
                total = instances.len(),
                "⚠️ No healthy instances, degrading to all instances"
            );
            instances
        } else {
            healthy
        };

        let Some(balancer) = &self.load_balancer else {
            return candidates
                .into_iter()
                .next()
                .ok_or_else(|| ClientError::NoAvailableInstances(service_name.to_string()));
        };

        match balancer.select(&candidates) {
            Some(instance) => {
                debug!(
                    service = %service_name,
                    instance_id = %instance.id,
                    balancer = balancer.name(),
                    "Instance selected"
                );
                Ok(instance.clone())
            }
            None => Err(ClientError::SelectionFailed {
                service: service_name.to_string(),
                balancer: balancer.name().to_string(),
            }),
        }
    }

    /// 熔断器处于 Open 状态时返回错误；未配置熔断器时总是成功
    pub fn check_circuit(&self, service_name: &str) -> Result<(), ClientError> {
        match &self.circuit_breaker {
            Some(cb) if cb.get_state(service_name) == CircuitState::Open => {
                Err(ClientError::CircuitOpen(service_name.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn record_success(&self, service_name: &str) {
        if let Some(cb) = &self.circuit_breaker {
            cb.record_success(service_name);
        }
    }

    pub fn record_failure(&self, service_name: &str) {
        if let Some(cb) = &self.circuit_breaker {
            cb.record_failure(service_name);
        }
    }

    /// 选择实例并执行调用，结果计入该服务的熔断状态
    ///
    /// 熔断拒绝时不会访问服务发现；实例选择失败也计为一次失败。
    pub async fn call<F, Fut, T, E>(&self, service_name: &str, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce(ServiceInstance) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cb) = &self.circuit_breaker {
            if cb.acquire(service_name).is_err() {
                return Err(ClientError::CircuitOpen(service_name.to_string()).into());
            }
        }

        let instance = match self.select_instance(service_name).await {
            Ok(instance) => instance,
            Err(e) => {
                self.record_failure(service_name);
                return Err(e.into());
            }
        };

        match f(instance).await {
            Ok(value) => {
                self.record_success(service_name);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(service_name);
                Err(CallError::Execution(e))
            }
        }
    }

    pub async fn watch(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>, DiscoveryError> {
        self.discovery.watch(service_name).await
    }

    pub fn stop(&self) {
        self.discovery.stop();
    }
}

/// [`ClientManager`] 构建器
pub struct ClientManagerBuilder {
    inner: ClientManager,
}

impl ClientManagerBuilder {
    pub fn load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.inner.load_balancer = Some(balancer);
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.inner.circuit_breaker = Some(breaker);
        self
    }

    pub fn build(self) -> ClientManager {
        self.inner
    }
}
