//! 协调存储抽象和实现
//!
//! 服务发现和服务注册都只通过 [`CoordinationStore`] 访问协调存储（etcd 等），
//! 存储本身不在本 crate 中实现。

pub mod etcd;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::StoreError;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// 服务实例键空间的根
pub const SERVICES_ROOT: &str = "/services";

/// 租约 ID
pub type LeaseId = i64;

/// 协调存储操作结果
pub type StoreResult<T> = Result<T, StoreError>;

/// 监听流：每一项是一次响应中的一批事件
pub type WatchStream = Pin<Box<dyn Stream<Item = StoreResult<Vec<WatchEvent>>> + Send>>;

/// 某个服务的键前缀：`/services/{service_name}/`
pub fn service_prefix(service_name: &str) -> String {
    format!("{}/{}/", SERVICES_ROOT, service_name)
}

/// 实例键：`/services/{service_name}/{instance_id}`
pub fn instance_key(service_name: &str, instance_id: &str) -> String {
    format!("{}/{}/{}", SERVICES_ROOT, service_name, instance_id)
}

/// 键值对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// 监听事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// 监听事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    /// Delete 事件的值为空
    pub value: Vec<u8>,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: WatchEventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: WatchEventKind::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }
}

/// 协调存储 trait
///
/// 所有后端（etcd、内存）都需要实现这个 trait。
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 按前缀读取所有键值对
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>>;

    /// 写入键值，可选绑定租约（租约过期后键被删除）
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<()>;

    /// 删除键
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// 申请租约
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId>;

    /// 续期一次租约；租约不存在或已过期时返回 [`StoreError::LeaseNotFound`]
    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<()>;

    /// 撤销租约（同时删除绑定的键）
    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()>;

    /// 按前缀监听变化
    ///
    /// 流在上游关闭时结束；错误以 `Err` 项传递，调用方决定是否继续。
    async fn watch_prefix(&self, prefix: &str) -> StoreResult<WatchStream>;
}
