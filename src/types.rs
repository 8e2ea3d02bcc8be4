//! 服务注册信息
//!
//! 注册进程在注册时创建 [`ServiceInfo`]，序列化后写入协调存储
//! `/services/{service_name}/{instance_id}`。

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 默认 TTL（秒）
pub const DEFAULT_TTL_SECS: u64 = 10;

/// 默认协议
pub const DEFAULT_PROTOCOL: &str = "grpc";

/// 服务注册信息
///
/// 写入协调存储的 JSON 结构：
/// `{service_name, address, port, protocol, version, metadata, ttl}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_name: String,

    /// 实例 ID，为空时由 [`ServiceInfo::validate`] 生成 `{service_name}-{address}-{port}`
    #[serde(skip)]
    pub instance_id: String,

    pub address: String,
    pub port: u32,

    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,

    /// 租约 TTL（秒），0 表示使用默认值
    #[serde(default)]
    pub ttl: u64,
}

/// 注册时附带的健康检查描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// 检查间隔（秒）
    pub interval: u64,
    /// 超时时间（秒）
    pub timeout: u64,
    /// HTTP 检查路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ServiceInfo {
    pub fn new(service_name: impl Into<String>, address: impl Into<String>, port: u32) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: String::new(),
            address: address.into(),
            port,
            protocol: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            health_check: None,
            ttl: 0,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckSpec) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// 校验并补全默认值
    ///
    /// - `service_name`、`address` 不能为空
    /// - `port` 必须在 `1..=65535`
    /// - `ttl` 为 0 时使用 10 秒
    /// - `protocol` 为空时使用 `grpc`
    /// - `instance_id` 为空时生成 `{service_name}-{address}-{port}`
    pub fn validate(&mut self) -> Result<(), RegistryError> {
        if self.service_name.trim().is_empty() {
            return Err(RegistryError::InvalidServiceName);
        }
        if self.address.trim().is_empty() {
            return Err(RegistryError::InvalidAddress);
        }
        if self.port == 0 || self.port > u16::MAX as u32 {
            return Err(RegistryError::InvalidPort(self.port));
        }
        if self.ttl == 0 {
            self.ttl = DEFAULT_TTL_SECS;
        }
        if self.protocol.is_empty() {
            self.protocol = DEFAULT_PROTOCOL.to_string();
        }
        if self.instance_id.is_empty() {
            self.instance_id = self.default_instance_id();
        }
        Ok(())
    }

    /// 默认实例 ID：`{service_name}-{address}-{port}`
    pub fn default_instance_id(&self) -> String {
        format!("{}-{}-{}", self.service_name, self.address, self.port)
    }

    /// 服务地址（`address:port`）
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fills_defaults() {
        let mut info = ServiceInfo::new("user-service", "10.0.0.1", 9000);
        info.validate().unwrap();

        assert_eq!(info.ttl, DEFAULT_TTL_SECS);
        assert_eq!(info.protocol, "grpc");
        assert_eq!(info.instance_id, "user-service-10.0.0.1-9000");
    }

    #[test]
    fn test_validate_keeps_explicit_values() {
        let mut info = ServiceInfo::new("user-service", "10.0.0.1", 9000)
            .with_instance_id("node-1")
            .with_protocol("http")
            .with_ttl(30);
        info.validate().unwrap();

        assert_eq!(info.instance_id, "node-1");
        assert_eq!(info.protocol, "http");
        assert_eq!(info.ttl, 30);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert_eq!(
            ServiceInfo::new("", "10.0.0.1", 9000).validate(),
            Err(RegistryError::InvalidServiceName)
        );
        assert_eq!(
            ServiceInfo::new("svc", " ", 9000).validate(),
            Err(RegistryError::InvalidAddress)
        );
        assert_eq!(
            ServiceInfo::new("svc", "10.0.0.1", 0).validate(),
            Err(RegistryError::InvalidPort(0))
        );
        assert_eq!(
            ServiceInfo::new("svc", "10.0.0.1", 70000).validate(),
            Err(RegistryError::InvalidPort(70000))
        );
    }

    #[test]
    fn test_json_shape() {
        let mut info = ServiceInfo::new("A", "10.0.0.1", 9000).with_version("v1");
        info.validate().unwrap();

        let value: serde_json::Value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["service_name"], "A");
        assert_eq!(value["address"], "10.0.0.1");
        assert_eq!(value["port"], 9000);
        assert_eq!(value["protocol"], "grpc");
        assert_eq!(value["ttl"], 10);
        assert!(value.get("instance_id").is_none());
        assert!(value.get("health_check").is_none());
    }
}
