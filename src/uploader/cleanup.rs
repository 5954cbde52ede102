// 分片清理
//
// - 会话不存在：不做任何事
// - 会话已完成且非强制：保留全部对象和会话记录
// - 其余情况：一次批量删除所有已记录的分片对象（单独超时，失败只记录日志，不重试）
// - 非强制清理保留会话记录，但清空分片记录，续传时重新上传
// - 强制清理时同时删除会话记录

use crate::uploader::context::UploadContext;
use crate::uploader::error::UploadResult;
use crate::uploader::retry::with_timeout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 清理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// 会话不存在
    SessionMissing,
    /// 会话已完成，未强制清理
    Retained,
    /// 已清理
    Cleaned {
        /// 请求删除的对象数
        removed_objects: usize,
        /// 批量删除是否失败
        delete_failed: bool,
        /// 会话记录是否已删除
        session_deleted: bool,
    },
}

#[derive(Clone)]
pub struct SessionCleaner {
    ctx: Arc<UploadContext>,
}

impl SessionCleaner {
    pub fn new(ctx: Arc<UploadContext>) -> Self {
        Self { ctx }
    }

    pub async fn cleanup(&self, session_id: &str, force: bool) -> UploadResult<CleanupOutcome> {
        let _guard = self.ctx.locks.acquire(session_id).await;

        let mut session = match self.ctx.sessions.find_by_id(session_id).await? {
            Some(s) => s,
            None => return Ok(CleanupOutcome::SessionMissing),
        };

        if session.is_complete && !force {
            info!("会话已完成，保留分片: session={}", session_id);
            return Ok(CleanupOutcome::Retained);
        }

        let mut paths = session.chunks.storage_paths();
        if force {
            if let Some(manifest) = &session.manifest_path {
                paths.push(manifest.clone());
            }
        }

        let mut delete_failed = false;
        if !paths.is_empty() {
            let result = with_timeout(
                self.ctx.config.storage_operation_timeout(),
                "批量删除分片",
                self.ctx.storage.remove(&session.bucket, &paths),
            )
            .await;
            if let Err(e) = result {
                warn!(
                    "清理分片失败（忽略）: session={}, {} 个对象, 错误类型: {}",
                    session_id,
                    paths.len(),
                    e.kind()
                );
                delete_failed = true;
            }
        }

        let mut session_deleted = false;
        if force {
            session_deleted = self.ctx.sessions.delete_by_id(session_id).await?;
        } else if session.uploaded_count() > 0 {
            // 删除失败时对象可能部分残留，重新上传会覆盖同一路径
            session.reset_chunks(self.ctx.clock.now());
            self.ctx.sessions.save(&session).await?;
        }

        info!(
            "会话清理完成: session={}, 删除对象 {} 个, 删除会话记录: {}",
            session_id,
            paths.len(),
            session_deleted
        );

        Ok(CleanupOutcome::Cleaned {
            removed_objects: paths.len(),
            delete_failed,
            session_deleted,
        })
    }
}
