// 重试与超时
//
// - 退避延迟：min(base * 2^(attempt-1) + jitter, cap)，attempt 从 1 开始
// - 等待通过注入的 Clock 完成，测试中可替换为不真正休眠的时钟
// - 单次操作用 tokio::time::timeout 包装，超时视为可重试错误

use crate::config::UploadConfig;
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// 时钟抽象
#[async_trait]
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> DateTime<Utc>;

    /// 等待指定时长
    async fn sleep(&self, duration: Duration);
}

/// 基于 tokio 的真实时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始退避延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大退避延迟（毫秒）
    pub max_delay_ms: u64,
    /// 抖动上限（毫秒）
    pub max_jitter_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
            max_jitter_ms: config.retry_max_jitter_ms,
        }
    }

    /// 计算第 `attempt` 次失败后的退避延迟（给定抖动值）
    ///
    /// # 延迟序列（base=1000, cap=10000, jitter=0）
    /// - attempt=1: 1000ms
    /// - attempt=2: 2000ms
    /// - attempt=3: 4000ms
    /// - attempt=5: 10000ms（封顶）
    pub fn backoff_delay(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let delay = exp_delay.saturating_add(jitter_ms).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// 计算带随机抖动的退避延迟
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        self.backoff_delay(attempt, jitter)
    }
}

/// 为存储操作加超时
pub async fn with_timeout<T, F>(
    duration: Duration,
    operation: &str,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::timeout(operation)),
    }
}
