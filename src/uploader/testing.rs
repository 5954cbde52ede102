// 测试替身：可注入故障的存储、只记录不休眠的时钟

use crate::storage::{MemoryStorage, StorageBackend, StorageError, StorageErrorKind};
use crate::uploader::retry::Clock;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Fail(StorageErrorKind),
    Hang,
}

#[derive(Debug)]
struct FailureRule {
    suffix: String,
    remaining: u32,
    behavior: Behavior,
}

/// 在内存存储外包一层故障注入
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    rules: Arc<Mutex<Vec<FailureRule>>>,
    put_counts: Arc<DashMap<String, u32>>,
    remove_calls: Arc<Mutex<Vec<Vec<String>>>>,
    fail_remove: Arc<Mutex<bool>>,
    put_delay: Arc<Mutex<Option<Duration>>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 路径以 `suffix` 结尾的写入前 `times` 次失败
    pub fn fail_times(&self, suffix: &str, times: u32, kind: StorageErrorKind) {
        self.rules.lock().push(FailureRule {
            suffix: suffix.to_string(),
            remaining: times,
            behavior: Behavior::Fail(kind),
        });
    }

    /// 路径以 `suffix` 结尾的写入始终失败
    pub fn fail_always(&self, suffix: &str, kind: StorageErrorKind) {
        self.fail_times(suffix, u32::MAX, kind);
    }

    /// 路径以 `suffix` 结尾的写入前 `times` 次挂起不返回
    pub fn hang_times(&self, suffix: &str, times: u32) {
        self.rules.lock().push(FailureRule {
            suffix: suffix.to_string(),
            remaining: times,
            behavior: Behavior::Hang,
        });
    }

    /// 每次写入前等待 `delay`（配合 start_paused 使用）
    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock() = Some(delay);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        *self.fail_remove.lock() = fail;
    }

    /// 路径以 `suffix` 结尾的对象被写入的次数（含失败）
    pub fn put_count(&self, suffix: &str) -> u32 {
        self.put_counts
            .iter()
            .filter(|e| e.key().ends_with(suffix))
            .map(|e| *e.value())
            .sum()
    }

    pub fn total_puts(&self) -> u32 {
        self.put_counts.iter().map(|e| *e.value()).sum()
    }

    pub fn remove_calls(&self) -> Vec<Vec<String>> {
        self.remove_calls.lock().clone()
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.inner.contains(bucket, path)
    }

    pub fn object_count(&self) -> usize {
        self.inner.object_count()
    }

    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }

    fn next_behavior(&self, path: &str) -> Option<Behavior> {
        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.remaining > 0 && path.ends_with(&r.suffix))?;
        if rule.remaining != u32::MAX {
            rule.remaining -= 1;
        }
        Some(rule.behavior)
    }
}

#[async_trait]
impl StorageBackend for FlakyStorage {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        *self.put_counts.entry(path.to_string()).or_insert(0) += 1;

        let delay = *self.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_behavior(path) {
            Some(Behavior::Fail(kind)) => Err(StorageError::new(kind, "injected failure")),
            Some(Behavior::Hang) => futures::future::pending().await,
            None => self.inner.put(bucket, path, data, content_type).await,
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.inner.public_url(bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        self.remove_calls.lock().push(paths.to_vec());
        if *self.fail_remove.lock() {
            return Err(StorageError::new(StorageErrorKind::ServerError, "injected failure"));
        }
        self.inner.remove(bucket, paths).await
    }
}

/// 记录等待时长但不真正休眠的时钟
#[derive(Debug, Clone)]
pub struct RecordingClock {
    now: DateTime<Utc>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Default for RecordingClock {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}
