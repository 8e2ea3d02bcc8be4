//! 配置模块
//!
//! 配置文件示例：
//!
//! ```toml
//! [registry]
//! enabled = true
//! service_name = "user-service"
//! address = "10.0.0.1:9000"
//! ttl = "10s"
//!
//! [registry.etcd]
//! endpoints = ["http://127.0.0.1:2379"]
//! max_retries = 5
//! initial_retry_delay = "500ms"
//!
//! [client]
//! load_balancer = "weighted"
//!
//! [client.circuit_breaker]
//! failure_threshold = 5
//! timeout = "30s"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::ExponentialBackoff;

/// 顶层配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl ResilienceConfig {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ResilienceConfig = toml::from_str(content)?;
        config.registry.validate()?;
        if let Some(breaker) = &config.client.circuit_breaker {
            breaker.validate()?;
        }
        Ok(config)
    }
}

/// 服务注册配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_registry_type")]
    pub registry_type: String,

    #[serde(default)]
    pub service_name: String,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub version: String,

    #[serde(default = "default_ttl", with = "duration_format")]
    pub ttl: Duration,

    /// 本实例对外地址（`host:port`）
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub etcd: EtcdConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            registry_type: default_registry_type(),
            service_name: String::new(),
            protocol: default_protocol(),
            version: String::new(),
            ttl: default_ttl(),
            address: String::new(),
            metadata: HashMap::new(),
            etcd: EtcdConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// 启用时必须配置服务名、地址和 etcd 地址
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("registry.service_name is required".into()));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("registry.address is required".into()));
        }
        if self.registry_type.eq_ignore_ascii_case("etcd") && self.etcd.endpoints.is_empty() {
            return Err(ConfigError::Invalid("registry.etcd.endpoints is required".into()));
        }
        if self.etcd.retry_backoff < 1.0 {
            return Err(ConfigError::Invalid(
                "registry.etcd.retry_backoff must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// etcd 连接与重试配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EtcdConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default = "default_dial_timeout", with = "duration_format")]
    pub dial_timeout: Duration,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_true")]
    pub enable_retry: bool,

    /// 0 表示无限重试
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_initial_retry_delay", with = "duration_format")]
    pub initial_retry_delay: Duration,

    #[serde(default = "default_max_retry_delay", with = "duration_format")]
    pub max_retry_delay: Duration,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            dial_timeout: default_dial_timeout(),
            username: String::new(),
            password: String::new(),
            enable_retry: true,
            max_retries: 0,
            initial_retry_delay: default_initial_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl EtcdConfig {
    /// 注册重试使用的退避策略
    pub fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.max_retries,
            self.initial_retry_delay,
            self.max_retry_delay,
            self.retry_backoff,
        )
    }
}

/// 客户端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// `round_robin` | `random` | `weighted`，未知值按轮询处理
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,

    /// 不配置则不启用熔断
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            load_balancer: default_load_balancer(),
            circuit_breaker: None,
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Closed 状态下连续失败多少次后打开
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// HalfOpen 状态下连续成功多少次后关闭
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Open 持续多久后允许探测
    #[serde(default = "default_breaker_timeout", with = "duration_format")]
    pub timeout: Duration,

    /// HalfOpen 窗口内允许的探测请求总数
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,

    /// 状态表分片数（1 表示所有资源共享一把锁）
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout: default_breaker_timeout(),
            half_open_requests: default_half_open_requests(),
            shards: default_shards(),
        }
    }
}

impl CircuitBreakerConfig {
    /// HalfOpen 的探测预算必须足够凑齐 `success_threshold` 次成功
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.half_open_requests < self.success_threshold.max(1) {
            return Err(ConfigError::Invalid(format!(
                "client.circuit_breaker.half_open_requests ({}) must be >= success_threshold ({})",
                self.half_open_requests, self.success_threshold
            )));
        }
        Ok(())
    }

    /// HalfOpen 窗口内实际生效的探测预算
    pub fn effective_half_open_requests(&self) -> u32 {
        self.half_open_requests.max(self.success_threshold).max(1)
    }
}

fn default_registry_type() -> String {
    "etcd".to_string()
}

fn default_protocol() -> String {
    "grpc".to_string()
}

fn default_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_initial_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_load_balancer() -> String {
    "round_robin".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_half_open_requests() -> u32 {
    2
}

fn default_shards() -> usize {
    16
}

/// 时长字段：整数秒，或 `"500ms"` / `"10s"` / `"1m"` / `"1h"` 字符串
pub mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", value.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// 解析 `500ms`、`10s`、`2m`、`1h`，不带单位时按秒处理
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let number: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration: {text:?}"))?;

        match unit.trim() {
            "ms" => Ok(Duration::from_millis(number)),
            "" | "s" => Ok(Duration::from_secs(number)),
            "m" => Ok(Duration::from_secs(number * 60)),
            "h" => Ok(Duration::from_secs(number * 3600)),
            other => Err(format!("unknown duration unit {other:?} in {text:?}")),
        }
    }
}
