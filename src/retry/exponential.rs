use super::RetryPolicy;
use std::time::Duration;

/// 指数退避重试策略
///
/// 第 n 次重试等待 `min(initial_delay * multiplier^n, max_delay)`；
/// `max_retries = 0` 表示无限重试。
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        // 倍数小于 1 时按 1 处理，避免延迟递减
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let factor = multiplier.powi(attempt.min(64) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;

        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ExponentialBackoff::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
        );

        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_duration(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff_duration(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_bounded_retries() {
        let policy = ExponentialBackoff {
            max_retries: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_means_unbounded() {
        let policy = ExponentialBackoff::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn test_non_growing_multiplier() {
        let policy = ExponentialBackoff::new(
            0,
            Duration::from_millis(50),
            Duration::from_secs(1),
            0.5,
        );
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(50));
    }
}
