// 会话持久化模块
//
// 会话存储只提供按 ID 的增删改查：
// - MemorySessionStore：进程内存（测试、单次 CLI 运行）
// - JsonFileSessionStore：每个会话一个 JSON 文件，写入为临时文件 + 原子重命名
//
// 读-改-写的串行化由上传引擎的会话锁负责，这里不做并发控制

pub mod json_file;
pub mod memory;

use crate::config::{SessionStoreConfig, SessionStoreKind};
use crate::uploader::UploadSession;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use json_file::JsonFileSessionStore;
pub use memory::MemorySessionStore;

/// 会话存储错误
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("会话文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("会话序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("会话已存在: {0}")]
    AlreadyExists(String),

    #[error("非法的会话ID: {0:?}")]
    InvalidId(String),
}

/// 会话存储
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 创建会话（ID 已存在时返回 AlreadyExists）
    async fn create(&self, session: &UploadSession) -> Result<(), SessionStoreError>;

    /// 按 ID 查找
    async fn find_by_id(&self, id: &str) -> Result<Option<UploadSession>, SessionStoreError>;

    /// 保存（覆盖）
    async fn save(&self, session: &UploadSession) -> Result<(), SessionStoreError>;

    /// 按 ID 删除，返回是否确实删除了记录
    async fn delete_by_id(&self, id: &str) -> Result<bool, SessionStoreError>;
}

/// 校验会话ID（只允许字母、数字、`-`、`_`）
pub(crate) fn validate_session_id(id: &str) -> Result<(), SessionStoreError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidId(id.to_string()))
    }
}

/// 根据配置创建会话存储
pub fn build_session_store(config: &SessionStoreConfig) -> Arc<dyn SessionRepository> {
    match config.backend {
        SessionStoreKind::Memory => Arc::new(MemorySessionStore::new()),
        SessionStoreKind::Json => Arc::new(JsonFileSessionStore::new(&config.session_dir)),
    }
}
