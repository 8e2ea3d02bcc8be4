//! 服务注册 Trait 定义

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ServiceInfo;

/// 服务注册 Trait
///
/// 每个注册器只负责本进程的一个实例。
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 注册服务；已注册（或正在重试注册）时返回 `AlreadyRegistered`
    async fn register(&self, info: ServiceInfo) -> Result<()>;

    /// 注销服务；未注册时返回 `NotRegistered`
    async fn deregister(&self) -> Result<()>;

    /// 合并更新元数据
    async fn update_metadata(&self, metadata: HashMap<String, String>) -> Result<()>;

    /// 实例当前是否存在于协调存储中
    fn is_registered(&self) -> bool;

    /// 关闭注册器（已注册时先注销）
    async fn close(&self) -> Result<()>;
}
