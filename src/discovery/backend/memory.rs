//! 内存协调存储（用于测试/开发）
//!
//! 语义与 etcd 保持一致：前缀读取、租约绑定键、租约过期删除键并推送 Delete 事件。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{CoordinationStore, KeyValue, LeaseId, StoreResult, WatchEvent, WatchStream};
use crate::error::StoreError;

struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<StoreResult<Vec<WatchEvent>>>,
}

#[derive(Default)]
struct Inner {
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: LeaseId,
    watchers: Vec<Watcher>,
    unavailable: bool,
    failing_puts: usize,
}

impl Inner {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// 删除已过期租约绑定的键
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        if self.leases.remove(&id).is_none() {
            return false;
        }
        let keys: Vec<String> = self
            .kvs
            .iter()
            .filter(|(_, entry)| entry.lease == Some(id))
            .map(|(key, _)| key.clone())
            .collect();
        let events: Vec<WatchEvent> = keys
            .into_iter()
            .map(|key| {
                self.kvs.remove(&key);
                WatchEvent::delete(key)
            })
            .collect();
        self.notify(events);
        true
    }

    fn notify(&mut self, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        self.watchers.retain(|watcher| {
            let matched: Vec<WatchEvent> = events
                .iter()
                .filter(|event| event.key.starts_with(&watcher.prefix))
                .cloned()
                .collect();
            if matched.is_empty() {
                return !watcher.tx.is_closed();
            }
            watcher.tx.send(Ok(matched)).is_ok()
        });
    }
}

/// 内存协调存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用（所有操作返回 [`StoreError::Unavailable`]）
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// 接下来的 `count` 次 `put` 返回 [`StoreError::Unavailable`]，其他操作不受影响
    pub fn fail_next_puts(&self, count: usize) {
        self.inner.lock().failing_puts = count;
    }

    /// 立即让租约过期
    pub fn expire_lease(&self, lease: LeaseId) -> bool {
        self.inner.lock().drop_lease(lease)
    }

    /// 向所有监听者推送一个错误
    pub fn inject_watch_error(&self, message: &str) {
        let inner = self.inner.lock();
        for watcher in &inner.watchers {
            let _ = watcher.tx.send(Err(StoreError::Watch(message.to_string())));
        }
    }

    /// 关闭所有监听流（模拟上游断开）
    pub fn close_watches(&self) {
        self.inner.lock().watchers.clear();
    }

    /// 当前键数量
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前有效租约数量
    pub fn lease_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner.leases.len()
    }

    /// 读取单个键
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner.kvs.get(key).map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.purge_expired(Instant::now());

        Ok(inner
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        if inner.failing_puts > 0 {
            inner.failing_puts -= 1;
            return Err(StoreError::Unavailable("put rejected".to_string()));
        }
        inner.purge_expired(Instant::now());

        if let Some(id) = lease {
            if !inner.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id));
            }
        }

        inner.kvs.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                lease,
            },
        );
        inner.notify(vec![WatchEvent::put(key, value)]);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.purge_expired(Instant::now());

        if inner.kvs.remove(key).is_some() {
            inner.notify(vec![WatchEvent::delete(key)]);
        }
        Ok(())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        let mut inner = self.inner.lock();
        inner.check_available()?;

        let ttl = Duration::from_secs(ttl_secs.max(1) as u64);
        inner.next_lease += 1;
        let id = inner.next_lease;
        inner.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let now = Instant::now();
        inner.purge_expired(now);

        match inner.leases.get_mut(&lease) {
            Some(l) => {
                l.deadline = now + l.ttl;
                Ok(())
            }
            None => Err(StoreError::LeaseNotFound(lease)),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.drop_lease(lease);
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<WatchStream> {
        let mut inner = self.inner.lock();
        inner.check_available()?;

        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
