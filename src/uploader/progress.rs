// 进度查询（只读）

use crate::uploader::context::UploadContext;
use crate::uploader::error::UploadResult;
use crate::uploader::session::{SessionState, UploadSession, UploadStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 进度报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub session_id: String,
    pub state: SessionState,
    pub progress_percent: f64,
    pub uploaded_chunks: usize,
    pub total_chunks: usize,
    /// 尚未上传的分片索引
    pub missing_chunks: Vec<usize>,
    pub is_complete: bool,
    pub final_manifest_url: Option<String>,
    pub stats: UploadStats,
    pub bucket: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&UploadSession> for ProgressReport {
    fn from(session: &UploadSession) -> Self {
        Self {
            session_id: session.id.clone(),
            state: session.state(),
            progress_percent: session.progress_percent,
            uploaded_chunks: session.uploaded_count(),
            total_chunks: session.total_chunks,
            missing_chunks: session.chunks.missing_indices(),
            is_complete: session.is_complete,
            final_manifest_url: session.final_manifest_url.clone(),
            stats: session.stats(),
            bucket: session.bucket.clone(),
            updated_at: session.updated_at,
        }
    }
}

/// 查询会话进度
pub async fn get_progress(ctx: &UploadContext, session_id: &str) -> UploadResult<ProgressReport> {
    let session = ctx.load_session(session_id).await?;
    Ok(ProgressReport::from(&session))
}
