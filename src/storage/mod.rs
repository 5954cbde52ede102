// 对象存储模块
//
// 上传引擎只依赖三个能力：写入对象、生成公开地址、批量删除对象。
// 后端实现：
// - MemoryStorage：进程内存（开发调试）
// - LocalFsStorage：本地文件系统
// - HttpStorage：HTTP 对象存储服务（REST 接口）

pub mod http;
pub mod local;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use http::HttpStorage;
pub use local::LocalFsStorage;
pub use memory::MemoryStorage;

use crate::config::{StorageBackendKind, StorageConfig};

/// 分片对象的内容类型
pub const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

/// 存储错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    /// 网络错误（可重试）
    Network,
    /// 超时（可重试）
    Timeout,
    /// 服务器错误（可重试）
    ServerError,
    /// 限流（可重试）
    RateLimited,
    /// 对象过大（不可重试）
    PayloadTooLarge,
    /// 对象或存储桶不存在（不可重试）
    NotFound,
    /// 权限不足（不可重试）
    Forbidden,
    /// 参数错误（不可重试）
    BadRequest,
    /// 未知错误
    Unknown,
}

impl StorageErrorKind {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::Network
                | StorageErrorKind::Timeout
                | StorageErrorKind::ServerError
                | StorageErrorKind::RateLimited
        )
    }

    /// 从 HTTP 状态码转换
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 504 => StorageErrorKind::Timeout,
            429 => StorageErrorKind::RateLimited,
            413 => StorageErrorKind::PayloadTooLarge,
            404 => StorageErrorKind::NotFound,
            401 | 403 => StorageErrorKind::Forbidden,
            400 | 409 | 422 => StorageErrorKind::BadRequest,
            500..=599 => StorageErrorKind::ServerError,
            _ => StorageErrorKind::Unknown,
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageErrorKind::Network => "network",
            StorageErrorKind::Timeout => "timeout",
            StorageErrorKind::ServerError => "server_error",
            StorageErrorKind::RateLimited => "rate_limited",
            StorageErrorKind::PayloadTooLarge => "payload_too_large",
            StorageErrorKind::NotFound => "not_found",
            StorageErrorKind::Forbidden => "forbidden",
            StorageErrorKind::BadRequest => "bad_request",
            StorageErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// 存储操作错误
#[derive(Debug, Clone, Error)]
#[error("存储操作失败 [{kind}]: {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(StorageErrorKind::Timeout, format!("{} 超时", operation))
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::Forbidden,
            std::io::ErrorKind::TimedOut => StorageErrorKind::Timeout,
            std::io::ErrorKind::InvalidInput => StorageErrorKind::BadRequest,
            _ => StorageErrorKind::Unknown,
        };
        Self::new(kind, e.to_string())
    }
}

/// 对象存储后端
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 写入对象，返回对象的存储路径
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// 对象的公开访问地址
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// 批量删除对象（不存在的对象视为已删除）
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError>;
}

/// 校验存储路径，拒绝空路径、绝对路径和 `..` 片段
pub(crate) fn validate_object_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.starts_with('/') {
        return Err(StorageError::new(
            StorageErrorKind::BadRequest,
            format!("非法的对象路径: {:?}", path),
        ));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::new(
            StorageErrorKind::BadRequest,
            format!("非法的对象路径: {:?}", path),
        ));
    }
    Ok(())
}

/// 根据配置创建存储后端
pub fn build_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let storage: Arc<dyn StorageBackend> = match config.backend {
        StorageBackendKind::Memory => Arc::new(MemoryStorage::new(&config.public_base_url)),
        StorageBackendKind::Local => Arc::new(LocalFsStorage::new(
            config.local_root.clone(),
            &config.public_base_url,
        )),
        StorageBackendKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("HTTP 存储后端需要配置 storage.endpoint"))?;
            Arc::new(HttpStorage::new(endpoint, config.api_key.clone())?)
        }
    };
    Ok(storage)
}
