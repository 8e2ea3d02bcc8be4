//! 错误代码和错误类别定义
//!
//! 错误代码按类别分组，每个类别占用1000个代码范围：
//! - 1000-1999: 参数校验错误（调用方修正，不重试）
//! - 2000-2999: 注册生命周期错误（编程错误）
//! - 3000-3999: 注册中心可用性错误（按退避策略重试）
//! - 4000-4999: 健康检查错误（通过 HealthStatus 上报）
//! - 5000-5999: 熔断错误
//! - 6000-6999: 服务发现与实例选择错误
//! - 7000-7999: 配置与序列化错误

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 参数校验错误 (1000-1999)
    // ============================================================
    InvalidServiceName = 1000,
    InvalidAddress = 1001,
    InvalidPort = 1002,

    // ============================================================
    // 生命周期错误 (2000-2999)
    // ============================================================
    NotRegistered = 2000,
    AlreadyRegistered = 2001,

    // ============================================================
    // 后端可用性错误 (3000-3999)
    // ============================================================
    RegistryUnavailable = 3000,
    HeartbeatFailed = 3001,
    KeepAliveFailed = 3002,
    MaxRetriesExceeded = 3003,

    // ============================================================
    // 健康检查错误 (4000-4999)
    // ============================================================
    HealthCheckFailed = 4000,
    HealthCheckTimeout = 4001,

    // ============================================================
    // 熔断错误 (5000-5999)
    // ============================================================
    CircuitOpen = 5000,
    HalfOpenLimitReached = 5001,

    // ============================================================
    // 服务发现错误 (6000-6999)
    // ============================================================
    DiscoveryFailed = 6000,
    NoAvailableInstances = 6001,
    SelectionFailed = 6002,

    // ============================================================
    // 配置与序列化错误 (7000-7999)
    // ============================================================
    ConfigurationError = 7000,
    SerializationError = 7001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidServiceName => "INVALID_SERVICE_NAME",
            ErrorCode::InvalidAddress => "INVALID_ADDRESS",
            ErrorCode::InvalidPort => "INVALID_PORT",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::HeartbeatFailed => "HEARTBEAT_FAILED",
            ErrorCode::KeepAliveFailed => "KEEP_ALIVE_FAILED",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            ErrorCode::HealthCheckTimeout => "HEALTH_CHECK_TIMEOUT",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::HalfOpenLimitReached => "HALF_OPEN_LIMIT_REACHED",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::NoAvailableInstances => "NO_AVAILABLE_INSTANCES",
            ErrorCode::SelectionFailed => "SELECTION_FAILED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Validation,
            2000..=2999 => ErrorCategory::Lifecycle,
            3000..=3999 => ErrorCategory::Backend,
            4000..=4999 => ErrorCategory::Health,
            5000..=5999 => ErrorCategory::Circuit,
            6000..=6999 => ErrorCategory::Discovery,
            _ => ErrorCategory::Config,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 只有后端可用性错误可以通过退避重试恢复；`MaxRetriesExceeded` 已是终态。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RegistryUnavailable
                | ErrorCode::HeartbeatFailed
                | ErrorCode::KeepAliveFailed
                | ErrorCode::DiscoveryFailed
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    Lifecycle,
    Backend,
    Health,
    Circuit,
    Discovery,
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "VALIDATION"),
            ErrorCategory::Lifecycle => write!(f, "LIFECYCLE"),
            ErrorCategory::Backend => write!(f, "BACKEND"),
            ErrorCategory::Health => write!(f, "HEALTH"),
            ErrorCategory::Circuit => write!(f, "CIRCUIT"),
            ErrorCategory::Discovery => write!(f, "DISCOVERY"),
            ErrorCategory::Config => write!(f, "CONFIG"),
        }
    }
}
