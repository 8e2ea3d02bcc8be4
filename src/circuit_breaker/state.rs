//! 熔断状态机
//!
//! 与资源无关的 Closed / Open / HalfOpen 自动机。时间由调用方传入，
//! 状态机本身不持有锁也不启动定时器：Open -> HalfOpen 只在下一次请求到来时发生。

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

/// 熔断状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// 请求准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 放行
    Allowed,
    /// Open 且未到探测时间
    RejectedOpen,
    /// HalfOpen 探测预算已用完
    RejectedHalfOpen,
}

/// 状态迁移记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// 状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_attempts: u32,
    pub last_state_change: DateTime<Utc>,
}

/// 单个资源的熔断状态机
#[derive(Debug, Clone)]
pub struct CircuitStateMachine {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_attempts: u32,
    last_state_change: Instant,
    last_state_change_at: DateTime<Utc>,
}

impl CircuitStateMachine {
    pub fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_attempts: 0,
            last_state_change: now,
            last_state_change_at: Utc::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// 进入当前状态以来经过的时间
    pub fn elapsed_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_state_change)
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            half_open_attempts: self.half_open_attempts,
            last_state_change: self.last_state_change_at,
        }
    }

    /// 请求准入
    ///
    /// Open 状态超过 `timeout` 后，本次请求把状态切到 HalfOpen 并作为第一个探测放行。
    /// HalfOpen 的探测计数在请求完成时不回退，是整个窗口的预算。
    pub fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> (Admission, Option<Transition>) {
        let mut transition = None;

        if self.state == CircuitState::Open {
            if self.elapsed_in_state(now) < config.timeout {
                return (Admission::RejectedOpen, None);
            }
            transition = self.transition_to(CircuitState::HalfOpen, now);
        }

        match self.state {
            CircuitState::Closed => (Admission::Allowed, transition),
            CircuitState::HalfOpen => {
                if self.half_open_attempts >= config.effective_half_open_requests() {
                    (Admission::RejectedHalfOpen, transition)
                } else {
                    self.half_open_attempts += 1;
                    (Admission::Allowed, transition)
                }
            }
            CircuitState::Open => (Admission::RejectedOpen, transition),
        }
    }

    /// 记录一次成功
    pub fn on_success(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    self.transition_to(CircuitState::Closed, now)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    /// 记录一次失败
    pub fn on_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, now)
                } else {
                    None
                }
            }
            // HalfOpen 下任何一次失败直接回到 Open
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open, now),
            CircuitState::Open => None,
        }
    }

    /// 状态迁移；迁移到当前状态是空操作
    pub fn transition_to(&mut self, to: CircuitState, now: Instant) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_attempts = 0;
        self.last_state_change = now;
        self.last_state_change_at = Utc::now();
        Some(Transition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
            half_open_requests: 2,
            shards: 1,
        }
    }

    fn open_machine(cfg: &CircuitBreakerConfig, now: Instant) -> CircuitStateMachine {
        let mut m = CircuitStateMachine::new(now);
        for _ in 0..cfg.failure_threshold {
            m.on_failure(cfg, now);
        }
        assert_eq!(m.state(), CircuitState::Open);
        m
    }

    #[test]
    fn test_opens_after_threshold() {
        let cfg = config();
        let now = Instant::now();
        let mut m = CircuitStateMachine::new(now);

        assert_eq!(m.on_failure(&cfg, now), None);
        assert_eq!(m.on_failure(&cfg, now), None);
        assert_eq!(
            m.on_failure(&cfg, now),
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cfg = config();
        let now = Instant::now();
        let mut m = CircuitStateMachine::new(now);

        m.on_failure(&cfg, now);
        m.on_failure(&cfg, now);
        m.on_success(&cfg, now);
        assert_eq!(m.stats().failure_count, 0);

        m.on_failure(&cfg, now);
        m.on_failure(&cfg, now);
        assert_eq!(m.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let cfg = config();
        let start = Instant::now();
        let mut m = open_machine(&cfg, start);

        let (admission, _) = m.try_acquire(&cfg, start + Duration::from_secs(9));
        assert_eq!(admission, Admission::RejectedOpen);
        assert_eq!(m.state(), CircuitState::Open);

        let (admission, transition) = m.try_acquire(&cfg, start + Duration::from_secs(10));
        assert_eq!(admission, Admission::Allowed);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen
            })
        );
        assert_eq!(m.stats().half_open_attempts, 1);
    }

    #[test]
    fn test_half_open_budget_is_not_refunded() {
        let cfg = config();
        let start = Instant::now();
        let mut m = open_machine(&cfg, start);
        let later = start + cfg.timeout;

        assert_eq!(m.try_acquire(&cfg, later).0, Admission::Allowed);
        assert_eq!(m.try_acquire(&cfg, later).0, Admission::Allowed);
        m.on_success(&cfg, later);
        assert_eq!(m.state(), CircuitState::HalfOpen);
        assert_eq!(m.try_acquire(&cfg, later).0, Admission::RejectedHalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cfg = config();
        let start = Instant::now();
        let mut m = open_machine(&cfg, start);
        let later = start + cfg.timeout;

        m.try_acquire(&cfg, later);
        assert!(m.on_failure(&cfg, later).is_some());
        assert_eq!(m.state(), CircuitState::Open);
        // 重新计时
        assert_eq!(m.try_acquire(&cfg, later).0, Admission::RejectedOpen);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cfg = config();
        let start = Instant::now();
        let mut m = open_machine(&cfg, start);
        let later = start + cfg.timeout;

        m.try_acquire(&cfg, later);
        m.try_acquire(&cfg, later);
        assert_eq!(m.on_success(&cfg, later), None);
        assert!(m.on_success(&cfg, later).is_some());

        let stats = m.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.half_open_attempts, 0);
    }

    #[test]
    fn test_half_open_budget_covers_success_threshold() {
        let cfg = CircuitBreakerConfig {
            half_open_requests: 1,
            success_threshold: 2,
            ..config()
        };
        let start = Instant::now();
        let mut m = open_machine(&cfg, start);
        let later = start + cfg.timeout;

        for _ in 0..2 {
            assert_eq!(m.try_acquire(&cfg, later).0, Admission::Allowed);
            m.on_success(&cfg, later);
        }
        assert_eq!(m.state(), CircuitState::Closed);
    }

    #[test]
    fn test_transition_to_same_state_is_noop() {
        let now = Instant::now();
        let mut m = CircuitStateMachine::new(now);
        assert_eq!(m.transition_to(CircuitState::Closed, now), None);
    }
}
