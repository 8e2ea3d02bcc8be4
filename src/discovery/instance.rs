//! 服务实例定义
//!
//! 实例由服务发现根据协调存储中的键值对重建，调用方只读取副本。

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::ServiceInfo;

/// 未声明权重时的默认权重
pub const DEFAULT_WEIGHT: i64 = 100;

/// 元数据中携带权重的键
pub const METADATA_WEIGHT: &str = "weight";

/// 元数据中携带健康状态的键
pub const METADATA_HEALTHY: &str = "healthy";

/// 服务实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// 实例 ID（协调存储键的最后一段）
    pub id: String,

    /// 服务名
    pub service: String,

    pub address: String,
    pub port: u16,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 权重（用于加权负载均衡，<= 0 表示不参与加权选择）
    pub weight: i64,

    pub healthy: bool,
}

impl ServiceInstance {
    /// 创建新的服务实例（默认权重 100，健康）
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            address: address.into(),
            port,
            metadata: HashMap::new(),
            weight: DEFAULT_WEIGHT,
            healthy: true,
        }
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    /// 设置健康状态
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `address:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// 转换为 HTTP URL
    pub fn to_http_url(&self) -> String {
        format!("http://{}", self.endpoint())
    }

    /// 转换为 gRPC URI
    pub fn to_grpc_uri(&self) -> String {
        format!("http://{}", self.endpoint())
    }

    /// 解析为 SocketAddr（地址为主机名时返回 None）
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.endpoint().parse().ok()
    }

    /// 从注册信息构建实例
    ///
    /// 权重和健康状态可以通过元数据 `weight` / `healthy` 声明。
    pub fn from_service_info(id: impl Into<String>, service: &str, info: ServiceInfo) -> Option<Self> {
        let port = u16::try_from(info.port).ok()?;
        let weight = info
            .metadata
            .get(METADATA_WEIGHT)
            .and_then(|w| w.parse::<i64>().ok())
            .unwrap_or(DEFAULT_WEIGHT);
        let healthy = info
            .metadata
            .get(METADATA_HEALTHY)
            .and_then(|h| h.parse::<bool>().ok())
            .unwrap_or(true);
        let service = if info.service_name.is_empty() {
            service.to_string()
        } else {
            info.service_name
        };

        Some(Self {
            id: id.into(),
            service,
            address: info.address,
            port,
            metadata: info.metadata,
            weight,
            healthy,
        })
    }
}

/// 从协调存储键中提取实例 ID（最后一段路径）
///
/// `/services/foo/bar-1` -> `bar-1`
pub fn instance_id_from_key(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// 解析 `address:port` 形式的地址
pub fn parse_address(value: &str) -> Option<(String, u16)> {
    let (host, port) = value.trim().rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

/// 从协调存储的键值对解析实例
///
/// 先按 JSON 编码的 [`ServiceInfo`] 解析，失败时退化为 `address:port` 字符串，
/// 退化路径使用默认权重 100 且标记为健康。两者都失败时返回 None。
pub fn parse_instance(service: &str, key: &str, value: &[u8]) -> Option<ServiceInstance> {
    let id = instance_id_from_key(key);

    if let Ok(info) = serde_json::from_slice::<ServiceInfo>(value) {
        if let Some(instance) = ServiceInstance::from_service_info(id, service, info) {
            return Some(instance);
        }
    }

    let raw = String::from_utf8_lossy(value);
    match parse_address(&raw) {
        Some((address, port)) => Some(ServiceInstance::new(id, service, address, port)),
        None => {
            warn!(service = %service, key = %key, "Unparseable instance value, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_from_key() {
        assert_eq!(instance_id_from_key("/services/foo/bar-1"), "bar-1");
        assert_eq!(instance_id_from_key("/services/foo/bar-1/"), "bar-1");
        assert_eq!(instance_id_from_key("bar-1"), "bar-1");
    }

    #[test]
    fn test_parse_raw_address_value() {
        let inst = parse_instance("foo", "/services/foo/bar-1", b"127.0.0.1:9002").unwrap();
        assert_eq!(inst.id, "bar-1");
        assert_eq!(inst.service, "foo");
        assert_eq!(inst.address, "127.0.0.1");
        assert_eq!(inst.port, 9002);
        assert_eq!(inst.weight, DEFAULT_WEIGHT);
        assert!(inst.healthy);
    }

    #[test]
    fn test_malformed_json_falls_back_to_address() {
        // 合法 JSON 前缀但被截断
        assert!(parse_instance("foo", "/services/foo/x", br#"{"service_name": "foo", "#).is_none());

        // JSON 合法但端口越界，退化解析也失败
        let value = br#"{"service_name":"foo","address":"10.0.0.1","port":70000}"#;
        assert!(parse_instance("foo", "/services/foo/x", value).is_none());

        // 非 JSON 的地址串
        let inst = parse_instance("foo", "/services/foo/x", b" 10.1.1.1:80 ").unwrap();
        assert_eq!(inst.address, "10.1.1.1");
        assert_eq!(inst.port, 80);
    }

    #[test]
    fn test_parse_json_value() {
        let info = ServiceInfo::new("foo", "10.0.0.2", 8080)
            .with_metadata("weight", "20")
            .with_metadata("zone", "a");
        let value = serde_json::to_vec(&info).unwrap();

        let inst = parse_instance("foo", "/services/foo/node-2", &value).unwrap();
        assert_eq!(inst.id, "node-2");
        assert_eq!(inst.address, "10.0.0.2");
        assert_eq!(inst.port, 8080);
        assert_eq!(inst.weight, 20);
        assert!(inst.healthy);
        assert_eq!(inst.metadata.get("zone").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_parse_json_health_flag() {
        let info = ServiceInfo::new("foo", "10.0.0.3", 8080).with_metadata("healthy", "false");
        let value = serde_json::to_vec(&info).unwrap();

        let inst = parse_instance("foo", "/services/foo/node-3", &value).unwrap();
        assert!(!inst.healthy);
    }

    #[test]
    fn test_parse_address_variants() {
        assert_eq!(parse_address("10.0.0.1:80"), Some(("10.0.0.1".to_string(), 80)));
        assert_eq!(parse_address("[::1]:8080"), Some(("::1".to_string(), 8080)));
        assert_eq!(parse_address("10.0.0.1"), None);
        assert_eq!(parse_address(":80"), None);
        assert_eq!(parse_address("host:notaport"), None);
    }

    #[test]
    fn test_instance_json_shape() {
        let inst = ServiceInstance::new("a-1", "A", "10.0.0.1", 9000);
        let value = serde_json::to_value(&inst).unwrap();
        for field in ["id", "service", "address", "port", "metadata", "weight", "healthy"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
