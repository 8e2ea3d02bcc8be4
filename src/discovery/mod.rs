//! 服务发现模块
//!
//! 通过协调存储维护某个服务的实时实例表：先读取快照，再通过前缀监听增量更新。
//! 监听推送的是完整实例列表（快照），不是差量。

pub mod backend;
pub mod discover;
pub mod instance;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DiscoveryError;

pub use backend::{CoordinationStore, EtcdStore, MemoryStore};
pub use discover::{EtcdDiscovery, WATCH_BUFFER};
pub use instance::{ServiceInstance, parse_instance};

/// 服务发现 trait
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// 读取服务的当前实例（整体替换内部实例表），按实例 ID 排序
    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>, DiscoveryError>;

    /// 监听服务实例变化
    ///
    /// 实例表每次实际变化都会推送完整实例列表；`stop()` 或上游关闭时通道关闭。
    /// 调用方需要持续读取，缓冲区满时后台任务会等待。
    async fn watch(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>, DiscoveryError>;

    /// 停止所有监听任务
    fn stop(&self);
}
