// 批次调度
//
// 把分片索引按并发数切成连续批次：
// - 批次内所有分片并发上传，等待整批结束
// - 任一分片失败即整批失败：先强制清理会话，再返回 BatchTransfer 错误
// - 批次之间固定暂停，避免压垮存储服务
// - 全部批次结束后重新读取会话，校验分片数量
//
// 已上传的分片直接跳过，因此对部分完成的会话重复调用即为断点续传

use crate::uploader::cleanup::SessionCleaner;
use crate::uploader::context::UploadContext;
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::worker::{ChunkStatus, ChunkWorker};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 批量上传结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAllOutcome {
    pub session_id: String,
    pub total_chunks: usize,
    /// 本次实际传输的分片数
    pub uploaded_chunks: usize,
    /// 之前已上传而跳过的分片数
    pub skipped_chunks: usize,
    /// 批次数
    pub batches: usize,
    pub progress_percent: f64,
    pub is_complete: bool,
}

#[derive(Clone)]
pub struct BatchScheduler {
    ctx: Arc<UploadContext>,
    worker: ChunkWorker,
    cleaner: SessionCleaner,
}

impl BatchScheduler {
    pub fn new(ctx: Arc<UploadContext>, worker: ChunkWorker, cleaner: SessionCleaner) -> Self {
        Self {
            ctx,
            worker,
            cleaner,
        }
    }

    /// 上传整个文件
    ///
    /// `max_concurrency` 为空时使用会话初始化时的并发数
    pub async fn upload_all(
        &self,
        session_id: &str,
        source: Bytes,
        max_concurrency: Option<usize>,
    ) -> UploadResult<UploadAllOutcome> {
        let session = self.ctx.load_session(session_id).await?;
        if source.len() as u64 != session.total_size {
            return Err(UploadError::Validation(format!(
                "文件大小不匹配: 会话记录 {} bytes，实际 {} bytes",
                session.total_size,
                source.len()
            )));
        }

        let plan = session.plan();
        let concurrency = max_concurrency.unwrap_or(session.max_concurrency).max(1);
        let batches = plan.batches(concurrency);
        info!(
            "开始批量上传: session={}, {} 个分片, {} 个批次, 并发 {}",
            session_id,
            plan.chunk_count(),
            batches.len(),
            concurrency
        );

        let mut uploaded_chunks = 0usize;
        let mut skipped_chunks = 0usize;

        for (n, batch) in batches.iter().enumerate() {
            let batch_start = batch.start;
            let uploads = batch.clone().filter_map(|index| {
                let range = plan.range(index)?;
                let data = source.slice(range.start as usize..range.end as usize);
                let worker = self.worker.clone();
                Some(async move { worker.upload_chunk(session_id, index, data).await })
            });
            let results = futures::future::join_all(uploads).await;

            let mut failure = None;
            for result in results {
                match result {
                    Ok(outcome) => match outcome.status {
                        ChunkStatus::Uploaded => uploaded_chunks += 1,
                        ChunkStatus::AlreadyUploaded => skipped_chunks += 1,
                    },
                    Err(e) if failure.is_none() => failure = Some(e),
                    Err(e) => warn!("同批次的其他分片也失败: {}", e),
                }
            }

            if let Some(source_err) = failure {
                error!(
                    "批次 #{} (起始分片 #{}) 上传失败，强制清理会话: session={}, 错误: {}",
                    n, batch_start, session_id, source_err
                );
                if let Err(e) = self.cleaner.cleanup(session_id, true).await {
                    warn!("批次失败后的清理出错（忽略）: session={}, {}", session_id, e);
                }
                return Err(UploadError::BatchTransfer {
                    session_id: session_id.to_string(),
                    batch_start,
                    source: Box::new(source_err),
                });
            }

            if n + 1 < batches.len() {
                self.ctx.clock.sleep(self.ctx.config.batch_pause()).await;
            }
        }

        // 全部批次完成后重新校验
        let session = self.ctx.load_session(session_id).await?;
        let actual = session.uploaded_count();
        if actual != session.total_chunks {
            error!(
                "分片数量校验失败: session={}, 期望 {}, 实际 {}",
                session_id, session.total_chunks, actual
            );
            return Err(UploadError::Integrity {
                session_id: session_id.to_string(),
                expected: session.total_chunks,
                actual,
            });
        }

        info!(
            "批量上传完成: session={}, 新上传 {} 个, 跳过 {} 个",
            session_id, uploaded_chunks, skipped_chunks
        );

        Ok(UploadAllOutcome {
            session_id: session_id.to_string(),
            total_chunks: session.total_chunks,
            uploaded_chunks,
            skipped_chunks,
            batches: batches.len(),
            progress_percent: session.progress_percent,
            is_complete: session.is_complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::persistence::{MemorySessionStore, SessionRepository};
    use crate::storage::StorageErrorKind;
    use crate::uploader::testing::{FlakyStorage, RecordingClock};
    use crate::uploader::{MediaKind, NewSession, UploadSession};
    use std::time::Duration;

    struct Fixture {
        scheduler: BatchScheduler,
        worker: ChunkWorker,
        storage: FlakyStorage,
        clock: RecordingClock,
        store: MemorySessionStore,
        session: UploadSession,
    }

    async fn fixture(total_size: u64, chunk_size: u64, concurrency: usize) -> Fixture {
        let config = UploadConfig {
            chunk_size_bytes: chunk_size,
            max_concurrent_chunks: concurrency,
            max_retries: 2,
            retry_base_delay_ms: 10,
            retry_max_jitter_ms: 0,
            batch_pause_ms: 50,
            ..Default::default()
        };
        let storage = FlakyStorage::new();
        let clock = RecordingClock::new();
        let store = MemorySessionStore::new();
        let ctx = Arc::new(UploadContext::new(
            config.clone(),
            Arc::new(storage.clone()),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
        ));
        let session = UploadSession::new(
            NewSession {
                original_name: "lecture.mkv".to_string(),
                content_type: None,
                media_kind: MediaKind::Video,
                bucket: "videos".to_string(),
                folder: "courses".to_string(),
                total_size,
                chunk_size,
                max_concurrency: concurrency,
                chunk_timeout_ms: config.chunk_timeout_ms,
            },
            chrono::Utc::now(),
        );
        store.create(&session).await.unwrap();

        let worker = ChunkWorker::new(ctx.clone());
        let cleaner = SessionCleaner::new(ctx.clone());
        Fixture {
            scheduler: BatchScheduler::new(ctx, worker.clone(), cleaner),
            worker,
            storage,
            clock,
            store,
            session,
        }
    }

    fn source(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_uploads_every_chunk_with_correct_bytes() {
        let f = fixture(25, 10, 2).await;
        let data = source(25);
        let out = f
            .scheduler
            .upload_all(&f.session.id, data.clone(), None)
            .await
            .unwrap();

        assert_eq!(out.total_chunks, 3);
        assert_eq!(out.uploaded_chunks, 3);
        assert_eq!(out.batches, 2);
        assert!(out.is_complete);

        let last = f
            .storage
            .memory()
            .get("videos", &f.session.chunk_storage_path(2))
            .unwrap();
        assert_eq!(last.data, data.slice(20..25));

        // 两个批次之间暂停一次
        assert_eq!(f.clock.sleeps(), vec![Duration::from_millis(50)]);
    }

    #[tokio::test]
    async fn test_resume_skips_present_chunks() {
        let f = fixture(40, 10, 2).await;
        let data = source(40);
        f.worker
            .upload_chunk(&f.session.id, 1, data.slice(10..20))
            .await
            .unwrap();

        let out = f.scheduler.upload_all(&f.session.id, data, None).await.unwrap();
        assert_eq!(out.uploaded_chunks, 3);
        assert_eq!(out.skipped_chunks, 1);
        assert_eq!(f.storage.put_count("chunk_00001"), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_cleans_up_and_reports_start() {
        let f = fixture(30, 10, 1).await;
        f.storage
            .fail_always("chunk_00001", StorageErrorKind::Network);

        let err = f
            .scheduler
            .upload_all(&f.session.id, source(30), None)
            .await
            .unwrap_err();
        match &err {
            UploadError::BatchTransfer {
                batch_start,
                source,
                ..
            } => {
                assert_eq!(*batch_start, 1);
                assert!(matches!(**source, UploadError::PermanentTransfer(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // 第三个批次不会开始
        assert_eq!(f.storage.put_count("chunk_00002"), 0);
        // 已上传的分片 0 被删除，会话记录被删除
        assert!(!f
            .storage
            .contains("videos", &f.session.chunk_storage_path(0)));
        assert!(f.store.find_by_id(&f.session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_length_mismatch_rejected() {
        let f = fixture(30, 10, 2).await;
        let err = f
            .scheduler
            .upload_all(&f.session.id, source(29), None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
        assert_eq!(f.storage.total_puts(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_override_changes_batches() {
        let f = fixture(50, 10, 1).await;
        let out = f
            .scheduler
            .upload_all(&f.session.id, source(50), Some(5))
            .await
            .unwrap();
        assert_eq!(out.batches, 1);
        assert!(f.clock.sleeps().is_empty());
    }
}
