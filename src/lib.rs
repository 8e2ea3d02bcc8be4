//! Flare Service Resilience
//!
//! Client-side service resilience: etcd-backed service discovery with watch,
//! resilient service registration, load balancing and per-resource circuit breaking.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// 服务发现与注册
pub mod discovery;
pub mod health;
pub mod registry;
pub mod retry;

// 客户端容错
pub mod circuit_breaker;
pub mod client;

// Re-exports
pub use circuit_breaker::{
    CircuitBreaker, CircuitState, CircuitStateMachine, CircuitStats, ProtectedOperation, Rejection,
};
pub use client::{
    ClientManager, ClientManagerBuilder, LoadBalanceStrategy, LoadBalancer, new_load_balancer,
};
pub use config::{
    CircuitBreakerConfig, ClientConfig, EtcdConfig, RegistryConfig, ResilienceConfig,
};
pub use discovery::{
    CoordinationStore, EtcdDiscovery, EtcdStore, MemoryStore, ServiceDiscovery, ServiceInstance,
};
pub use error::{
    CallError, CircuitBreakerError, ClientError, ConfigError, DiscoveryError, ErrorCategory,
    ErrorCode, RegistryError, Result, StoreError,
};
pub use health::{HealthChecker, HealthStatus, NoopHealthChecker};
pub use logging::{init_json_tracing, init_tracing};
pub use registry::{EtcdRegistry, RegistrationOptions, RegistryManager, ServiceRegistry};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use types::ServiceInfo;
