//! 负载均衡模块
//!
//! 提供多种负载均衡策略，用于从多个服务实例中选择一个

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::discovery::ServiceInstance;

/// 负载均衡器 trait
pub trait LoadBalancer: Send + Sync {
    /// 选择服务实例，输入为空时返回 None
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance>;

    /// 策略名
    fn name(&self) -> &'static str;
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalanceStrategy {
    /// 轮询（Round Robin）
    #[default]
    RoundRobin,
    /// 随机（Random）
    Random,
    /// 加权（Weighted）
    Weighted,
}

impl LoadBalanceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::Weighted => "weighted",
        }
    }

    /// 创建该策略的负载均衡器
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            LoadBalanceStrategy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
            LoadBalanceStrategy::Random => Arc::new(RandomBalancer::new()),
            LoadBalanceStrategy::Weighted => Arc::new(WeightedBalancer::new()),
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "" | "round_robin" | "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "random" => Ok(LoadBalanceStrategy::Random),
            "weighted" | "weighted_round_robin" => Ok(LoadBalanceStrategy::Weighted),
            _ => Err(format!("Unknown load balance strategy: {}", s)),
        }
    }
}

/// 按名称创建负载均衡器，未知名称使用轮询
pub fn new_load_balancer(name: &str) -> Arc<dyn LoadBalancer> {
    name.parse::<LoadBalanceStrategy>()
        .unwrap_or_default()
        .build()
}

/// 轮询
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        instances.get(index % instances.len())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// 随机
pub struct RandomBalancer {
    rng: Mutex<StdRng>,
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 固定种子（便于复现）
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RandomBalancer {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..instances.len());
        instances.get(index)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// 加权
///
/// 只有健康且权重 > 0 的实例参与加权选择；总权重为 0 时退化为对全部输入轮询，
/// 输入非空时不会返回 None。
#[derive(Debug, Default)]
pub struct WeightedBalancer {
    counter: AtomicUsize,
    fallback: RoundRobinBalancer,
}

impl WeightedBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn eligible(instance: &ServiceInstance) -> bool {
        instance.healthy && instance.weight > 0
    }

    /// 权重来自远端元数据，截断到 `u32::MAX` 后累加不会溢出
    fn weight_of(instance: &ServiceInstance) -> u64 {
        instance.weight.clamp(0, u32::MAX as i64) as u64
    }
}

impl LoadBalancer for WeightedBalancer {
    fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        let total: u64 = instances
            .iter()
            .filter(|i| Self::eligible(i))
            .map(Self::weight_of)
            .fold(0u64, u64::saturating_add);
        if total == 0 {
            return self.fallback.select(instances);
        }

        let offset = (self.counter.fetch_add(1, Ordering::Relaxed) as u64) % total;
        let mut cumulative = 0u64;
        for instance in instances.iter().filter(|i| Self::eligible(i)) {
            cumulative = cumulative.saturating_add(Self::weight_of(instance));
            if cumulative > offset {
                return Some(instance);
            }
        }

        // offset < total，循环内必然返回
        self.fallback.select(instances)
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}
