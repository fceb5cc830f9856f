//! 重试策略
//!
//! 提供指数退避计算，供作业运行时决定失败事件何时重新入队。
//! 业务错误（如载荷格式非法）不应被重试，由调用方根据错误分类决定是否咨询本策略。

use std::time::Duration;

use crate::config::{StripeConfig, WorkerConfig};

// ---------------------------------------------------------------------------
// RetryPolicy 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 使用指数退避避免重试风暴：首次失败等 initial_delay，之后每次乘以 multiplier，
/// 直到达到最大间隔或最大重试次数。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限，防止等待过长
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多重试 3 次，初始等待 1 秒，最大等待 30 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 由事件处理配置构造策略
    ///
    /// `max_attempts` 计入首次执行，因此重试次数为 `max_attempts - 1`
    pub fn from_config(stripe: &StripeConfig, worker: &WorkerConfig) -> Self {
        Self {
            max_retries: stripe.max_attempts.saturating_sub(1),
            initial_delay: Duration::from_millis(worker.retry_initial_delay_ms),
            max_delay: Duration::from_millis(worker.retry_max_delay_ms),
            multiplier: 2.0,
        }
    }

    /// 计算第 N 次重试的等待时间（attempt 从 0 开始）
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 是否应继续重试
    ///
    /// attempt 表示已经发生的重试次数，当 attempt < max_retries 时返回 true。
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
