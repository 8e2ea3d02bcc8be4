//! 重试策略模块
//!
//! 用于注册中心的注册重试；业务调用本身的重试不在本模块范围内。

pub mod exponential;

pub use exponential::ExponentialBackoff;

use std::time::Duration;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    /// 已执行 `attempt` 次重试后是否继续重试
    fn should_retry(&self, attempt: u32) -> bool;

    /// 第 `attempt` 次重试前的等待时间（`attempt` 从 0 开始）
    fn backoff_duration(&self, attempt: u32) -> Duration;

    /// 最大重试次数，0 表示不限
    fn max_retries(&self) -> u32;
}
