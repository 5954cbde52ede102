// 上传管理器
//
// 对外的唯一入口，组合各个组件：
// - initialize：识别媒体类型、选择存储桶、创建会话
// - upload_chunk / upload_all：分片上传、批次调度
// - complete：生成清单
// - get_progress：进度查询
// - cleanup：清理分片和会话
// - upload_file：小文件直传，大文件走完整分片流程

use crate::config::{AppConfig, MediaConfig, UploadConfig};
use crate::persistence::{build_session_store, SessionRepository};
use crate::storage::{build_storage, StorageBackend};
use crate::uploader::assembler::{CompletionAssembler, CompletionResult};
use crate::uploader::classifier::{
    BucketRouter, ChainClassifier, FileMeta, MediaClassifier, MediaKind, RuleBasedClassifier,
};
use crate::uploader::cleanup::{CleanupOutcome, SessionCleaner};
use crate::uploader::context::UploadContext;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::progress::{self, ProgressReport};
use crate::uploader::retry::{with_timeout, Clock, TokioClock};
use crate::uploader::scheduler::{BatchScheduler, UploadAllOutcome};
use crate::uploader::session::{normalize_folder, NewSession, UploadSession};
use crate::uploader::worker::{ChunkUploadOutcome, ChunkWorker};
use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 初始化结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeOutcome {
    pub session_id: String,
    pub total_chunks: usize,
    pub chunk_size: u64,
    pub max_concurrency: usize,
    pub media_kind: MediaKind,
    pub bucket: String,
}

/// 整文件上传结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FileUploadOutcome {
    /// 小文件直传
    Direct {
        bucket: String,
        storage_path: String,
        public_url: String,
        size: u64,
        media_kind: MediaKind,
    },
    /// 分片上传
    Chunked(CompletionResult),
}

/// 上传管理器
pub struct UploadManager {
    ctx: Arc<UploadContext>,
    classifier: Box<dyn MediaClassifier>,
    router: BucketRouter,
    worker: ChunkWorker,
    scheduler: BatchScheduler,
    assembler: CompletionAssembler,
    cleaner: SessionCleaner,
}

impl UploadManager {
    /// 根据应用配置创建（真实时钟）
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        config.upload.validate().context("上传配置无效")?;
        let storage = build_storage(&config.storage).context("创建对象存储失败")?;
        let sessions = build_session_store(&config.session_store);
        Ok(Self::new(
            config.upload.clone(),
            config.media.clone(),
            storage,
            sessions,
            Arc::new(TokioClock),
        ))
    }

    pub fn new(
        upload: UploadConfig,
        media: MediaConfig,
        storage: Arc<dyn StorageBackend>,
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = Arc::new(UploadContext::new(upload, storage, sessions, clock));
        let classifier = ChainClassifier::new(vec![
            Box::new(RuleBasedClassifier::video(&media)),
            Box::new(RuleBasedClassifier::image(&media)),
        ]);
        let worker = ChunkWorker::new(ctx.clone());
        let cleaner = SessionCleaner::new(ctx.clone());
        let scheduler = BatchScheduler::new(ctx.clone(), worker.clone(), cleaner.clone());

        Self {
            router: BucketRouter::new(media),
            classifier: Box::new(classifier),
            assembler: CompletionAssembler::new(ctx.clone()),
            worker,
            scheduler,
            cleaner,
            ctx,
        }
    }

    /// 替换媒体类型识别器
    pub fn with_classifier(mut self, classifier: Box<dyn MediaClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.ctx.config
    }

    /// 识别媒体类型并规范化目录
    fn admit(&self, meta: &FileMeta, folder: &str) -> UploadResult<(MediaKind, String, String)> {
        if meta.size == 0 {
            return Err(UploadError::Validation(format!(
                "文件内容为空: {}",
                meta.original_name
            )));
        }

        let classification = self.classifier.classify(meta).ok_or_else(|| {
            UploadError::Validation(format!(
                "不支持的媒体类型: {} (content-type: {})",
                meta.original_name,
                meta.content_type.as_deref().unwrap_or("-")
            ))
        })?;

        let folder = validate_folder(folder)?;
        let bucket = self.router.route(classification.kind, &folder);
        Ok((classification.kind, folder, bucket))
    }

    /// 初始化分片上传会话
    pub async fn initialize(&self, meta: &FileMeta, folder: &str) -> UploadResult<InitializeOutcome> {
        let (media_kind, folder, bucket) = self.admit(meta, folder)?;

        let session = UploadSession::new(
            NewSession {
                original_name: meta.original_name.clone(),
                content_type: meta.content_type.clone(),
                media_kind,
                bucket,
                folder,
                total_size: meta.size,
                chunk_size: self.ctx.config.chunk_size_bytes,
                max_concurrency: self.ctx.config.max_concurrent_chunks,
                chunk_timeout_ms: self.ctx.config.chunk_timeout_ms,
            },
            self.ctx.clock.now(),
        );
        self.ctx.sessions.create(&session).await?;

        info!(
            "创建上传会话: session={}, 文件={}, 大小={} bytes, {} 个分片, 存储桶={}",
            session.id, session.original_name, session.total_size, session.total_chunks, session.bucket
        );

        Ok(InitializeOutcome {
            session_id: session.id,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
            max_concurrency: session.max_concurrency,
            media_kind,
            bucket: session.bucket,
        })
    }

    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: usize,
        data: Bytes,
    ) -> UploadResult<ChunkUploadOutcome> {
        self.worker.upload_chunk(session_id, index, data).await
    }

    pub async fn upload_all(
        &self,
        session_id: &str,
        source: Bytes,
        max_concurrency: Option<usize>,
    ) -> UploadResult<UploadAllOutcome> {
        self.scheduler
            .upload_all(session_id, source, max_concurrency)
            .await
    }

    pub async fn complete(&self, session_id: &str) -> UploadResult<CompletionResult> {
        self.assembler.complete(session_id).await
    }

    pub async fn get_progress(&self, session_id: &str) -> UploadResult<ProgressReport> {
        progress::get_progress(&self.ctx, session_id).await
    }

    pub async fn cleanup(&self, session_id: &str, force: bool) -> UploadResult<CleanupOutcome> {
        self.cleaner.cleanup(session_id, force).await
    }

    /// 上传整个文件
    ///
    /// 小于分片阈值的文件一次写入，不创建会话；否则走完整的分片流程
    pub async fn upload_file(
        &self,
        meta: &FileMeta,
        folder: &str,
        data: Bytes,
    ) -> UploadResult<FileUploadOutcome> {
        if data.len() as u64 != meta.size {
            return Err(UploadError::Validation(format!(
                "文件大小不匹配: 声明 {} bytes，实际 {} bytes",
                meta.size,
                data.len()
            )));
        }

        if self.ctx.config.requires_chunking(meta.size) {
            let init = self.initialize(meta, folder).await?;
            self.upload_all(&init.session_id, data, None).await?;
            let result = self.complete(&init.session_id).await?;
            return Ok(FileUploadOutcome::Chunked(result));
        }

        let (media_kind, folder, bucket) = self.admit(meta, folder)?;
        let ext = meta.extension().unwrap_or_else(|| "bin".to_string());
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let storage_path = if folder.is_empty() {
            file_name
        } else {
            format!("{}/{}", folder, file_name)
        };
        let content_type = meta
            .content_type
            .clone()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&meta.original_name)
                    .first_or_octet_stream()
                    .to_string()
            });

        let result = with_timeout(
            self.ctx.config.storage_operation_timeout(),
            "直传文件",
            self.ctx
                .storage
                .put(&bucket, &storage_path, data, &content_type),
        )
        .await;
        if let Err(e) = result {
            warn!(
                "直传失败: 文件={}, 存储桶={}, 错误类型: {}",
                meta.original_name,
                bucket,
                e.kind()
            );
            return Err(e.into());
        }

        info!(
            "直传完成: 文件={}, 大小={} bytes, 存储桶={}, 路径={}",
            meta.original_name, meta.size, bucket, storage_path
        );

        Ok(FileUploadOutcome::Direct {
            public_url: self.ctx.storage.public_url(&bucket, &storage_path),
            bucket,
            storage_path,
            size: meta.size,
            media_kind,
        })
    }
}

/// 规范化并校验目录（不允许 `.`、`..` 片段）
fn validate_folder(folder: &str) -> UploadResult<String> {
    let normalized = normalize_folder(folder);
    if normalized.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(UploadError::Validation(format!("非法的目录: {}", folder)));
    }
    Ok(normalized)
}
