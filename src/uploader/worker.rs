// 分片上传
//
// 单个分片的上传流程：
// 1. 持有会话锁：读取会话，校验索引和长度，已上传则直接返回
// 2. 释放锁：带超时和指数退避的重试上传
// 3. 重新持有会话锁：重新读取会话，追加分片记录（已存在则忽略），重算进度并保存
//
// 同一索引的对象路径固定，重复上传只会覆盖同一对象

use crate::storage::CHUNK_CONTENT_TYPE;
use crate::uploader::chunk::{ChunkRecord, SlotInsert};
use crate::uploader::context::UploadContext;
use crate::uploader::error::{PermanentTransferError, UploadError, UploadResult};
use crate::uploader::retry::with_timeout;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 分片上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// 本次调用完成了上传
    Uploaded,
    /// 分片已有记录，本次调用未写入记录
    AlreadyUploaded,
}

/// 分片上传结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadOutcome {
    pub index: usize,
    pub status: ChunkStatus,
    pub storage_path: String,
    pub progress_percent: f64,
    pub is_complete: bool,
    /// 本次调用的尝试次数（未发生传输时为 0）
    pub attempts_used: u32,
}

/// 传输前从会话中取出的上传参数
struct TransferTarget {
    bucket: String,
    storage_path: String,
    size_bytes: u64,
    timeout: Duration,
}

/// 分片上传器
#[derive(Clone)]
pub struct ChunkWorker {
    ctx: Arc<UploadContext>,
}

impl ChunkWorker {
    pub fn new(ctx: Arc<UploadContext>) -> Self {
        Self { ctx }
    }

    /// 上传一个分片
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: usize,
        data: Bytes,
    ) -> UploadResult<ChunkUploadOutcome> {
        // 阶段1：校验（持有锁）
        let target = {
            let _guard = self.ctx.locks.acquire(session_id).await;
            let session = self.ctx.load_session(session_id).await?;

            if let Some(existing) = session.chunks.get(index) {
                debug!("[分片#{}] 已上传，跳过: session={}", index, session_id);
                return Ok(ChunkUploadOutcome {
                    index,
                    status: ChunkStatus::AlreadyUploaded,
                    storage_path: existing.storage_path.clone(),
                    progress_percent: session.progress_percent,
                    is_complete: session.is_complete,
                    attempts_used: 0,
                });
            }

            let expected = session.plan().chunk_len(index).ok_or_else(|| {
                UploadError::Validation(format!(
                    "分片索引越界: {} (共 {} 个分片)",
                    index, session.total_chunks
                ))
            })?;
            if data.len() as u64 != expected {
                return Err(UploadError::Validation(format!(
                    "分片 #{} 长度不匹配: 期望 {} bytes，实际 {} bytes",
                    index,
                    expected,
                    data.len()
                )));
            }

            TransferTarget {
                bucket: session.bucket.clone(),
                storage_path: session.chunk_storage_path(index),
                size_bytes: expected,
                timeout: Duration::from_millis(session.chunk_timeout_ms),
            }
        };

        // 阶段2：传输（不持有锁）
        let attempts_used = self.transfer_with_retry(index, &target, data).await?;

        // 阶段3：记录（持有锁）
        let guard = self.ctx.locks.acquire(session_id).await;
        let mut session = match self.ctx.sessions.find_by_id(session_id).await? {
            Some(session) => session,
            None => {
                // 传输期间会话被强制清理，刚写入的对象无人引用
                drop(guard);
                self.discard_orphan(index, &target).await;
                return Err(UploadError::SessionNotFound(session_id.to_string()));
            }
        };
        let record = ChunkRecord {
            index,
            storage_path: target.storage_path.clone(),
            size_bytes: target.size_bytes,
            uploaded_at: self.ctx.clock.now(),
            attempts_used,
        };

        match session.record_chunk(record, self.ctx.clock.now()) {
            SlotInsert::Inserted => {
                self.ctx.sessions.save(&session).await?;
                info!(
                    "[分片#{}] ✓ 上传成功 ({}/{} 完成, 尝试 {} 次): session={}",
                    index,
                    session.uploaded_count(),
                    session.total_chunks,
                    attempts_used,
                    session_id
                );
                Ok(ChunkUploadOutcome {
                    index,
                    status: ChunkStatus::Uploaded,
                    storage_path: target.storage_path,
                    progress_percent: session.progress_percent,
                    is_complete: session.is_complete,
                    attempts_used,
                })
            }
            SlotInsert::Occupied => {
                // 并发的同索引上传先一步完成记录
                debug!("[分片#{}] 已被并发请求记录: session={}", index, session_id);
                let storage_path = session
                    .chunks
                    .get(index)
                    .map(|r| r.storage_path.clone())
                    .unwrap_or(target.storage_path);
                Ok(ChunkUploadOutcome {
                    index,
                    status: ChunkStatus::AlreadyUploaded,
                    storage_path,
                    progress_percent: session.progress_percent,
                    is_complete: session.is_complete,
                    attempts_used,
                })
            }
            SlotInsert::OutOfRange => Err(UploadError::Validation(format!(
                "分片索引越界: {} (共 {} 个分片)",
                index, session.total_chunks
            ))),
        }
    }

    /// 带重试的传输，返回成功时使用的尝试次数
    async fn transfer_with_retry(
        &self,
        index: usize,
        target: &TransferTarget,
        data: Bytes,
    ) -> Result<u32, PermanentTransferError> {
        let policy = self.ctx.retry_policy();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(
                "[分片#{}] 开始上传 (第 {}/{} 次): {}/{}",
                index, attempt, policy.max_attempts, target.bucket, target.storage_path
            );

            let result = with_timeout(
                target.timeout,
                "上传分片",
                self.ctx.storage.put(
                    &target.bucket,
                    &target.storage_path,
                    data.clone(),
                    CHUNK_CONTENT_TYPE,
                ),
            )
            .await;

            let err = match result {
                Ok(_) => return Ok(attempt),
                Err(e) => e,
            };

            // 不可重试的错误立即失败
            if !err.is_retriable() {
                error!(
                    "[分片#{}] 上传失败（不可重试）: {}, 错误: {}",
                    index,
                    err.kind(),
                    err
                );
                return Err(self.permanent(index, target, attempt, &err));
            }

            if attempt >= policy.max_attempts {
                error!(
                    "[分片#{}] 上传失败，已达最大尝试次数 ({}): {}",
                    index, policy.max_attempts, err
                );
                return Err(self.permanent(index, target, attempt, &err));
            }

            let delay = policy.delay_for(attempt);
            warn!(
                "[分片#{}] 上传失败，等待 {}ms 后重试 ({}/{}): {}",
                index,
                delay.as_millis(),
                attempt,
                policy.max_attempts,
                err
            );
            self.ctx.clock.sleep(delay).await;
        }
    }

    /// 尽力删除无主分片对象，失败只记录日志
    async fn discard_orphan(&self, index: usize, target: &TransferTarget) {
        let paths = [target.storage_path.clone()];
        let result = with_timeout(
            self.ctx.config.storage_operation_timeout(),
            "删除无主分片",
            self.ctx.storage.remove(&target.bucket, &paths),
        )
        .await;
        match result {
            Ok(()) => warn!(
                "[分片#{}] 会话已被删除，移除刚写入的对象: {}/{}",
                index, target.bucket, target.storage_path
            ),
            Err(e) => warn!(
                "[分片#{}] 移除无主对象失败（忽略）: {}/{}, 错误类型: {}",
                index,
                target.bucket,
                target.storage_path,
                e.kind()
            ),
        }
    }

    fn permanent(
        &self,
        index: usize,
        target: &TransferTarget,
        attempts: u32,
        err: &crate::storage::StorageError,
    ) -> PermanentTransferError {
        PermanentTransferError {
            index,
            size_bytes: target.size_bytes,
            bucket: target.bucket.clone(),
            attempts,
            kind: err.kind(),
            failed_at: self.ctx.clock.now(),
        }
    }
}
