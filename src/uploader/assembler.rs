// 完成合并
//
// 所有分片上传完成后生成清单（按索引排序的分片地址 + 原始元数据 + 统计信息），
// 清单的公开地址就是对外的文件句柄。
//
// - 未上传完全部分片：返回 IncompleteUpload
// - 已完成的会话：直接返回之前的结果，不重复上传清单
// - 清单写入存储是尽力而为：失败只记录日志，结果中 manifest_persisted=false

use crate::uploader::classifier::MediaKind;
use crate::uploader::context::UploadContext;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::retry::with_timeout;
use crate::uploader::session::{UploadSession, UploadStats};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// 清单中的分片引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub index: usize,
    pub url: String,
    pub storage_path: String,
    pub size_bytes: u64,
}

/// 清单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub session_id: String,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub media_kind: MediaKind,
    pub format: String,
    pub bucket: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: usize,
    pub chunks: Vec<ManifestChunk>,
    pub stats: UploadStats,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Manifest {
    fn build(session: &UploadSession, ctx: &UploadContext, completed_at: DateTime<Utc>) -> Self {
        let chunks = session
            .chunks
            .records()
            .map(|r| ManifestChunk {
                index: r.index,
                url: ctx.storage.public_url(&session.bucket, &r.storage_path),
                storage_path: r.storage_path.clone(),
                size_bytes: r.size_bytes,
            })
            .collect();

        Self {
            session_id: session.id.clone(),
            original_name: session.original_name.clone(),
            content_type: session.content_type.clone(),
            media_kind: session.media_kind,
            format: session.format(),
            bucket: session.bucket.clone(),
            total_size: session.total_size,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            chunks,
            stats: session.stats(),
            created_at: session.created_at,
            completed_at,
        }
    }
}

/// 完成结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub session_id: String,
    /// 清单公开地址（对外文件句柄）
    pub manifest_url: String,
    pub manifest_path: String,
    /// 清单是否确认写入存储
    pub manifest_persisted: bool,
    pub format: String,
    pub total_size: u64,
    pub total_chunks: usize,
    /// 按索引排序的分片地址
    pub chunk_urls: Vec<String>,
    pub stats: UploadStats,
    pub completed_at: DateTime<Utc>,
}

impl CompletionResult {
    fn from_session(session: &UploadSession, ctx: &UploadContext) -> Option<Self> {
        Some(Self {
            session_id: session.id.clone(),
            manifest_url: session.final_manifest_url.clone()?,
            manifest_path: session.manifest_path.clone()?,
            manifest_persisted: session.manifest_persisted,
            format: session.format(),
            total_size: session.total_size,
            total_chunks: session.total_chunks,
            chunk_urls: session
                .chunks
                .records()
                .map(|r| ctx.storage.public_url(&session.bucket, &r.storage_path))
                .collect(),
            stats: session.stats(),
            completed_at: session.completed_at?,
        })
    }
}

#[derive(Clone)]
pub struct CompletionAssembler {
    ctx: Arc<UploadContext>,
}

impl CompletionAssembler {
    pub fn new(ctx: Arc<UploadContext>) -> Self {
        Self { ctx }
    }

    pub async fn complete(&self, session_id: &str) -> UploadResult<CompletionResult> {
        let session = {
            let _guard = self.ctx.locks.acquire(session_id).await;
            let session = self.ctx.load_session(session_id).await?;
            if let Some(result) = CompletionResult::from_session(&session, &self.ctx) {
                info!("会话已完成，返回已有结果: session={}", session_id);
                return Ok(result);
            }
            if !session.is_complete {
                return Err(UploadError::IncompleteUpload {
                    session_id: session_id.to_string(),
                    uploaded_chunks: session.uploaded_count(),
                    total_chunks: session.total_chunks,
                    progress_percent: session.progress_percent,
                });
            }
            session
        };

        // 上传清单（不持有锁）
        let completed_at = self.ctx.clock.now();
        let manifest = Manifest::build(&session, &self.ctx, completed_at);
        let manifest_path = session.manifest_storage_path();
        let manifest_persisted = self.persist_manifest(&session, &manifest, &manifest_path).await;
        let manifest_url = self.ctx.storage.public_url(&session.bucket, &manifest_path);

        let _guard = self.ctx.locks.acquire(session_id).await;
        let mut session = self.ctx.load_session(session_id).await?;
        if let Some(result) = CompletionResult::from_session(&session, &self.ctx) {
            // 并发的完成请求先一步写入了结果
            return Ok(result);
        }
        session.mark_completed(manifest_url, manifest_path, manifest_persisted, completed_at);
        self.ctx.sessions.save(&session).await?;

        info!(
            "上传完成: session={}, {} 个分片, {} bytes, 清单已写入: {}",
            session_id, session.total_chunks, session.total_size, manifest_persisted
        );

        CompletionResult::from_session(&session, &self.ctx)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    async fn persist_manifest(
        &self,
        session: &UploadSession,
        manifest: &Manifest,
        manifest_path: &str,
    ) -> bool {
        let body = match serde_json::to_vec_pretty(manifest) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!("清单序列化失败（忽略）: session={}, {}", session.id, e);
                return false;
            }
        };

        let result = with_timeout(
            self.ctx.config.storage_operation_timeout(),
            "写入清单",
            self.ctx
                .storage
                .put(&session.bucket, manifest_path, body, MANIFEST_CONTENT_TYPE),
        )
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "清单写入失败（忽略）: session={}, 错误类型: {}",
                    session.id,
                    e.kind()
                );
                false
            }
        }
    }
}
