//! 基于协调存储的服务发现
//!
//! 共享实例表是 `discover` 和监听任务写入的缓存，调用方拿到的都是副本。
//! 每个监听任务另外持有自己的实例表，变化检测只基于这张表，
//! 不受并发的 `discover` 或同一服务上其他监听的影响。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ServiceDiscovery;
use super::backend::{CoordinationStore, EtcdStore, WatchEvent, WatchEventKind, service_prefix};
use super::instance::{ServiceInstance, instance_id_from_key, parse_instance};
use crate::config::EtcdConfig;
use crate::error::DiscoveryError;

/// 监听通道缓冲的快照数量
pub const WATCH_BUFFER: usize = 10;

type InstanceTable = HashMap<String, ServiceInstance>;

/// 基于协调存储的服务发现
pub struct EtcdDiscovery {
    store: Arc<dyn CoordinationStore>,
    /// service_name -> (instance_id -> instance)
    instances: Arc<RwLock<HashMap<String, InstanceTable>>>,
    cancel: CancellationToken,
}

impl EtcdDiscovery {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            instances: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// 连接 etcd 并创建服务发现
    pub async fn connect(config: &EtcdConfig) -> Result<Self, DiscoveryError> {
        let store = EtcdStore::connect(config).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// 内存中缓存的实例（不访问协调存储）
    pub async fn cached_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.instances
            .read()
            .await
            .get(service_name)
            .map(snapshot)
            .unwrap_or_default()
    }

    /// 带外部取消令牌的监听
    ///
    /// `cancel` 或 `stop()` 任一触发都会结束监听任务并关闭通道。
    pub async fn watch_with_cancel(
        &self,
        service_name: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>, DiscoveryError> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::Stopped);
        }

        // 先建立监听再读快照，快照之后的事件不会丢失（重复的 Put 是幂等的）
        let mut stream = self.store.watch_prefix(&service_prefix(service_name)).await?;
        let mut local = self.fetch(service_name).await?;
        self.instances
            .write()
            .await
            .insert(service_name.to_string(), local.clone());

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let service = service_name.to_string();
        let instances = self.instances.clone();
        let stopped = self.cancel.clone();

        tokio::spawn(async move {
            debug!(service = %service, "Watch task started");
            loop {
                let item = tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = cancel.cancelled() => break,
                    item = stream.next() => item,
                };

                let events = match item {
                    Some(Ok(events)) => events,
                    Some(Err(e)) => {
                        warn!(service = %service, error = %e, "Watch stream error");
                        continue;
                    }
                    None => {
                        info!(service = %service, "Watch stream closed by coordination store");
                        break;
                    }
                };

                if !handle_watch_events(&service, &mut local, events) {
                    continue;
                }
                let update = snapshot(&local);
                instances.write().await.insert(service.clone(), local.clone());

                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = cancel.cancelled() => break,
                    sent = tx.send(update) => {
                        if sent.is_err() {
                            debug!(service = %service, "Watch receiver dropped");
                            break;
                        }
                    }
                }
            }
            debug!(service = %service, "Watch task stopped");
        });

        Ok(rx)
    }

    /// 从协调存储读取服务的全部实例，无法解析的条目被跳过
    async fn fetch(&self, service_name: &str) -> Result<InstanceTable, DiscoveryError> {
        let kvs = self.store.get_prefix(&service_prefix(service_name)).await?;
        Ok(kvs
            .iter()
            .filter_map(|kv| parse_instance(service_name, &kv.key, &kv.value))
            .map(|instance| (instance.id.clone(), instance))
            .collect())
    }
}

#[async_trait]
impl ServiceDiscovery for EtcdDiscovery {
    async fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let table = self.fetch(service_name).await?;
        let instances = snapshot(&table);

        self.instances
            .write()
            .await
            .insert(service_name.to_string(), table);

        debug!(service = %service_name, count = instances.len(), "Discovered service instances");
        Ok(instances)
    }

    async fn watch(
        &self,
        service_name: &str,
    ) -> Result<mpsc::Receiver<Vec<ServiceInstance>>, DiscoveryError> {
        self.watch_with_cancel(service_name, self.cancel.child_token())
            .await
    }

    fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Service discovery stopped");
        }
        self.cancel.cancel();
    }
}

impl Drop for EtcdDiscovery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 把一批监听事件应用到实例表，返回实例表是否变化
fn handle_watch_events(service: &str, table: &mut InstanceTable, events: Vec<WatchEvent>) -> bool {
    let mut changed = false;

    for event in events {
        match event.kind {
            WatchEventKind::Put => {
                let Some(instance) = parse_instance(service, &event.key, &event.value) else {
                    continue;
                };
                match table.get(&instance.id) {
                    Some(existing) if *existing == instance => {}
                    Some(_) => {
                        debug!(service = %service, instance_id = %instance.id, "Instance updated");
                        table.insert(instance.id.clone(), instance);
                        changed = true;
                    }
                    None => {
                        info!(
                            service = %service,
                            instance_id = %instance.id,
                            endpoint = %instance.endpoint(),
                            "🟢 Instance online"
                        );
                        table.insert(instance.id.clone(), instance);
                        changed = true;
                    }
                }
            }
            WatchEventKind::Delete => {
                let id = instance_id_from_key(&event.key);
                if table.remove(id).is_some() {
                    info!(service = %service, instance_id = %id, "🔴 Instance offline");
                    changed = true;
                }
            }
        }
    }

    changed
}

fn snapshot(table: &InstanceTable) -> Vec<ServiceInstance> {
    let mut instances: Vec<ServiceInstance> = table.values().cloned().collect();
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    instances
}
