// 上传错误定义
//
// 对外错误只携带诊断所需的上下文（分片索引、尝试次数、大小、存储桶、时间、错误类型），
// 不透出底层传输层的原始错误文本

use crate::persistence::SessionStoreError;
use crate::storage::{StorageError, StorageErrorKind};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// 分片上传永久失败（重试耗尽或遇到不可重试错误）
#[derive(Debug, Clone, Error)]
#[error(
    "分片 #{index} 上传失败: 已尝试 {attempts} 次, 大小 {size_bytes} bytes, 存储桶 {bucket}, 错误类型 {kind}, 时间 {failed_at}"
)]
pub struct PermanentTransferError {
    pub index: usize,
    pub size_bytes: u64,
    pub bucket: String,
    pub attempts: u32,
    pub kind: StorageErrorKind,
    pub failed_at: DateTime<Utc>,
}

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 参数校验失败（传输开始前拒绝）
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// 会话不存在
    #[error("上传会话不存在: {0}")]
    SessionNotFound(String),

    /// 分片永久失败
    #[error(transparent)]
    PermanentTransfer(#[from] PermanentTransferError),

    /// 未上传完全部分片就请求完成
    #[error("上传未完成: {uploaded_chunks}/{total_chunks} 个分片 ({progress_percent:.1}%)")]
    IncompleteUpload {
        session_id: String,
        uploaded_chunks: usize,
        total_chunks: usize,
        progress_percent: f64,
    },

    /// 批次完成后分片数量不一致
    #[error("分片数量校验失败: 会话 {session_id} 期望 {expected} 个分片，实际 {actual} 个")]
    Integrity {
        session_id: String,
        expected: usize,
        actual: usize,
    },

    /// 批次上传失败
    #[error("批次上传失败 (起始分片 #{batch_start}): {source}")]
    BatchTransfer {
        session_id: String,
        batch_start: usize,
        #[source]
        source: Box<UploadError>,
    },

    /// 直传等非分片场景的存储错误
    #[error("存储操作失败 [{0}]")]
    Storage(StorageErrorKind),

    /// 会话存储错误
    #[error("会话存储错误: {0}")]
    Store(#[from] SessionStoreError),
}

impl UploadError {
    /// 错误代码（供外部 HTTP 层映射响应）
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Validation(_) => "validation_error",
            UploadError::SessionNotFound(_) => "session_not_found",
            UploadError::PermanentTransfer(_) => "permanent_transfer_error",
            UploadError::IncompleteUpload { .. } => "incomplete_upload",
            UploadError::Integrity { .. } => "integrity_error",
            UploadError::BatchTransfer { .. } => "batch_transfer_error",
            UploadError::Storage(_) => "storage_error",
            UploadError::Store(_) => "session_store_error",
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(e: StorageError) -> Self {
        UploadError::Storage(e.kind())
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_error_message_has_context() {
        let err = PermanentTransferError {
            index: 1,
            size_bytes: 2048,
            bucket: "videos".to_string(),
            attempts: 3,
            kind: StorageErrorKind::Network,
            failed_at: Utc::now(),
        };
        let msg = err.to_string();
        assert!(msg.contains("#1"));
        assert!(msg.contains("3 次"));
        assert!(msg.contains("2048"));
        assert!(msg.contains("videos"));
        assert!(msg.contains("network"));
    }

    #[test]
    fn test_batch_error_wraps_source() {
        let inner = UploadError::PermanentTransfer(PermanentTransferError {
            index: 3,
            size_bytes: 1,
            bucket: "b".to_string(),
            attempts: 2,
            kind: StorageErrorKind::Timeout,
            failed_at: Utc::now(),
        });
        let err = UploadError::BatchTransfer {
            session_id: "s".to_string(),
            batch_start: 2,
            source: Box::new(inner),
        };
        assert_eq!(err.code(), "batch_transfer_error");
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("#3"));
    }

    #[test]
    fn test_storage_error_hides_message() {
        let err: UploadError =
            StorageError::new(StorageErrorKind::Forbidden, "token=secret rejected").into();
        assert!(!err.to_string().contains("secret"));
        assert_eq!(err.code(), "storage_error");
    }
}
