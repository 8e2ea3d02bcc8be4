//! 日志初始化
//!
//! 本 crate 只通过 `tracing` 宏输出日志；宿主进程可以自行安装 subscriber，
//! 也可以调用这里的辅助函数。过滤规则优先读取 `RUST_LOG`。

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// 安装文本格式的 subscriber
///
/// 已经安装过 subscriber 时返回 false，不会 panic。
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter(default_directive))
        .try_init()
        .is_ok()
}

/// 安装 JSON 格式的 subscriber（适合采集到日志平台）
pub fn init_json_tracing(default_directive: &str) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().json().with_current_span(false))
        .with(env_filter(default_directive))
        .try_init()
        .is_ok()
}
