//! 错误处理模块
//!
//! 按关注点划分错误类型（注册、协调存储、服务发现、客户端选择、熔断、配置），
//! 统一通过 [`ErrorCode`] 归类，调用方可以据此决定是否重试或告警。

pub mod code;

pub use code::{ErrorCategory, ErrorCode};

use std::time::Duration;
use thiserror::Error;

/// 服务注册错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid service name: must not be empty")]
    InvalidServiceName,

    #[error("invalid address: must not be empty")]
    InvalidAddress,

    #[error("invalid port {0}: must be within 1..=65535")]
    InvalidPort(u32),

    #[error("service not registered")]
    NotRegistered,

    #[error("service already registered")]
    AlreadyRegistered,

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("heartbeat failed: {0}")]
    HeartbeatFailed(String),

    #[error("lease keep-alive failed: {0}")]
    KeepAliveFailed(String),

    #[error("registration failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("health check timed out after {0:?}")]
    HealthCheckTimeout(Duration),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl RegistryError {
    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::InvalidServiceName => ErrorCode::InvalidServiceName,
            RegistryError::InvalidAddress => ErrorCode::InvalidAddress,
            RegistryError::InvalidPort(_) => ErrorCode::InvalidPort,
            RegistryError::NotRegistered => ErrorCode::NotRegistered,
            RegistryError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            RegistryError::RegistryUnavailable(_) => ErrorCode::RegistryUnavailable,
            RegistryError::HeartbeatFailed(_) => ErrorCode::HeartbeatFailed,
            RegistryError::KeepAliveFailed(_) => ErrorCode::KeepAliveFailed,
            RegistryError::MaxRetriesExceeded { .. } => ErrorCode::MaxRetriesExceeded,
            RegistryError::HealthCheckFailed(_) => ErrorCode::HealthCheckFailed,
            RegistryError::HealthCheckTimeout(_) => ErrorCode::HealthCheckTimeout,
            RegistryError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaseNotFound(_) => RegistryError::KeepAliveFailed(err.to_string()),
            other => RegistryError::RegistryUnavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

/// 协调存储（etcd 等）错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("lease {0} not found or expired")]
    LeaseNotFound(i64),

    #[error("watch stream error: {0}")]
    Watch(String),
}

/// 服务发现错误
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("discovery has been stopped")]
    Stopped,
}

/// 客户端实例选择错误
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("discover service failed: {0}")]
    Discover(#[source] DiscoveryError),

    #[error("no available instances for service: {0}")]
    NoAvailableInstances(String),

    #[error("load balancer {balancer} selected no instance for service: {service}")]
    SelectionFailed { service: String, balancer: String },

    #[error("circuit open for resource {0}")]
    CircuitOpen(String),
}

impl ClientError {
    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Discover(_) => ErrorCode::DiscoveryFailed,
            ClientError::NoAvailableInstances(_) => ErrorCode::NoAvailableInstances,
            ClientError::SelectionFailed { .. } => ErrorCode::SelectionFailed,
            ClientError::CircuitOpen(_) => ErrorCode::CircuitOpen,
        }
    }
}

/// `ClientManager::call` 错误
///
/// `E` 为调用方业务调用自身的错误类型。
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// 熔断拒绝或实例选择失败，调用未执行
    #[error(transparent)]
    Client(#[from] ClientError),

    /// 调用已执行但失败
    #[error("call failed: {0}")]
    Execution(E),
}

impl<E> CallError<E> {
    /// 取出业务调用的原始错误
    pub fn into_execution(self) -> Option<E> {
        match self {
            CallError::Execution(e) => Some(e),
            CallError::Client(_) => None,
        }
    }
}

/// 熔断器错误
///
/// `E` 为被保护操作自身的错误类型。
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// 熔断器处于 Open 状态，请求被直接拒绝
    #[error("circuit open for resource {resource}")]
    Open { resource: String },

    /// HalfOpen 窗口内的探测预算已用完
    #[error("circuit half-open probe budget exhausted for resource {resource}")]
    HalfOpenLimitReached { resource: String },

    /// 请求已执行但失败
    #[error("execution failed: {0}")]
    Execution(E),
}

impl<E> CircuitBreakerError<E> {
    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CircuitBreakerError::Open { .. } => Some(ErrorCode::CircuitOpen),
            CircuitBreakerError::HalfOpenLimitReached { .. } => {
                Some(ErrorCode::HalfOpenLimitReached)
            }
            CircuitBreakerError::Execution(_) => None,
        }
    }

    /// 是否为熔断器拒绝（请求未被执行）
    pub fn is_rejected(&self) -> bool {
        !matches!(self, CircuitBreakerError::Execution(_))
    }

    /// 取出被保护操作的原始错误
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitBreakerError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 注册操作结果类型
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_maps_to_backend_kinds() {
        let err: RegistryError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.code(), ErrorCode::RegistryUnavailable);
        assert!(err.is_retryable());

        let err: RegistryError = StoreError::LeaseNotFound(7).into();
        assert_eq!(err.code(), ErrorCode::KeepAliveFailed);
        assert_eq!(err.category(), ErrorCategory::Backend);
    }

    #[test]
    fn test_client_error_messages_carry_service_name() {
        let err = ClientError::NoAvailableInstances("user-service".into());
        assert_eq!(err.to_string(), "no available instances for service: user-service");

        let err = ClientError::Discover(DiscoveryError::Stopped);
        assert_eq!(err.to_string(), "discover service failed: discovery has been stopped");
    }

    #[test]
    fn test_circuit_breaker_error_rejection() {
        let err: CircuitBreakerError<String> = CircuitBreakerError::Open {
            resource: "orders".into(),
        };
        assert!(err.is_rejected());
        assert_eq!(err.to_string(), "circuit open for resource orders");
        assert_eq!(err.code(), Some(ErrorCode::CircuitOpen));

        let err = CircuitBreakerError::Execution("boom".to_string());
        assert!(!err.is_rejected());
        assert_eq!(err.into_execution().as_deref(), Some("boom"));
    }
}
