//! etcd 协调存储后端

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions,
};
use tracing::info;

use super::{CoordinationStore, KeyValue, LeaseId, StoreResult, WatchEvent, WatchStream};
use crate::config::EtcdConfig;
use crate::error::StoreError;

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// etcd 协调存储
///
/// `Client` 内部基于 tonic Channel，clone 成本很低，每次操作 clone 一份。
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// 连接 etcd
    pub async fn connect(config: &EtcdConfig) -> StoreResult<Self> {
        if config.endpoints.is_empty() {
            return Err(StoreError::Unavailable("etcd endpoints not configured".to_string()));
        }

        let mut options = ConnectOptions::new().with_connect_timeout(config.dial_timeout);
        if !config.username.is_empty() {
            options = options.with_user(config.username.clone(), config.password.clone());
        }

        let client = Client::connect(&config.endpoints, Some(options)).await?;
        info!(endpoints = ?config.endpoints, "Connected to etcd");

        Ok(Self { client })
    }

    /// 使用已有的客户端
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: kv.value().to_vec(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<()> {
        let mut client = self.client.clone();
        let opts = lease.map(|id| PutOptions::new().with_lease(id));
        client.put(key, value, opts).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        let mut client = self.client.clone();
        let lease = client.lease_grant(ttl_secs, None).await?;
        Ok(lease.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<()> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease).await?;
        keeper.keep_alive().await?;

        // etcd 对已过期的租约返回 TTL <= 0
        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => Err(StoreError::LeaseNotFound(lease)),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        let mut client = self.client.clone();
        client.lease_revoke(lease).await?;
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<WatchStream> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        // watcher 必须与流同生命周期，否则 etcd 端会取消监听
        let stream = futures::stream::unfold(Some((watcher, stream)), |state| async move {
            let (watcher, mut stream) = state?;
            match stream.message().await {
                Ok(Some(resp)) if resp.canceled() => None,
                Ok(Some(resp)) => {
                    let events = resp
                        .events()
                        .iter()
                        .filter_map(|event| {
                            let kv = event.kv()?;
                            let key = String::from_utf8_lossy(kv.key()).into_owned();
                            Some(match event.event_type() {
                                EventType::Put => WatchEvent::put(key, kv.value().to_vec()),
                                EventType::Delete => WatchEvent::delete(key),
                            })
                        })
                        .collect();
                    Some((Ok(events), Some((watcher, stream))))
                }
                Ok(None) => None,
                // 流出错后 etcd 不会再推送，交出错误并结束
                Err(e) => Some((Err(StoreError::Watch(e.to_string())), None)),
            }
        });

        Ok(Box::pin(stream))
    }
}
