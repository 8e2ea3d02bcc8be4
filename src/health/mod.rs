//! 健康检查模块
//!
//! 健康检查提供者由宿主进程注入注册管理器，本模块只定义接口和默认实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ErrorCode, RegistryError};

/// 健康状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    /// 失败时的错误代码（`HealthCheckFailed` / `HealthCheckTimeout`）
    pub error_code: Option<ErrorCode>,
    pub last_check: Option<DateTime<Utc>>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "ok".to_string(),
            error_code: None,
            last_check: Some(Utc::now()),
        }
    }

    pub fn unhealthy(error: &RegistryError) -> Self {
        Self {
            healthy: false,
            message: error.to_string(),
            error_code: Some(error.code()),
            last_check: Some(Utc::now()),
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            message: "unknown".to_string(),
            error_code: None,
            last_check: None,
        }
    }
}

/// 健康检查提供者
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// 执行一次检查，失败返回 `HealthCheckFailed` / `HealthCheckTimeout`
    async fn check(&self) -> Result<(), RegistryError>;

    /// 最近一次检查的状态
    fn status(&self) -> HealthStatus;
}

/// 默认实现：始终健康
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHealthChecker;

#[async_trait]
impl HealthChecker for NoopHealthChecker {
    async fn check(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn status(&self) -> HealthStatus {
        HealthStatus::healthy()
    }
}
