// 上传引擎共享上下文
//
// 所有组件（分片上传、批次调度、完成合并、清理、进度查询）共享同一份上下文：
// 配置、对象存储、会话存储、时钟，以及按会话划分的互斥锁

use crate::config::UploadConfig;
use crate::persistence::SessionRepository;
use crate::storage::StorageBackend;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::retry::{Clock, RetryPolicy};
use crate::uploader::session::UploadSession;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 会话锁表
///
/// 同一会话的“读取-追加-重算-保存”必须串行，不同会话互不影响。
/// 锁只在会话记录读写期间持有，分片传输期间不持有。
/// 没有任何调用方持有或等待某个会话的锁时，对应条目即被移除。
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取会话锁，守卫释放时自动清理空闲条目
    pub async fn acquire(&self, session_id: &str) -> SessionGuard<'_> {
        // 克隆发生在条目锁内，与 release 中的引用计数检查互斥
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        SessionGuard {
            locks: self,
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }

    /// 只剩锁表自身引用时移除条目
    fn release(&self, session_id: &str) {
        self.locks
            .remove_if(session_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// 会话锁守卫
pub struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // 先释放互斥锁及其引用，再检查是否还有其他持有者
        drop(self.guard.take());
        self.locks.release(&self.session_id);
    }
}

/// 上传引擎上下文
pub struct UploadContext {
    pub config: UploadConfig,
    pub storage: Arc<dyn StorageBackend>,
    pub sessions: Arc<dyn SessionRepository>,
    pub clock: Arc<dyn Clock>,
    pub locks: SessionLocks,
}

impl UploadContext {
    pub fn new(
        config: UploadConfig,
        storage: Arc<dyn StorageBackend>,
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            storage,
            sessions,
            clock,
            locks: SessionLocks::new(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// 读取会话，不存在时返回 SessionNotFound
    pub async fn load_session(&self, session_id: &str) -> UploadResult<UploadSession> {
        self.sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }
}
