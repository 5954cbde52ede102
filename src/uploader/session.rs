// 上传会话定义
//
// 会话是一次分片上传的聚合根：
// - 初始化时创建一次
// - 每个分片上传成功后追加记录（按索引写入，已存在则忽略）
// - 完成时写入清单字段
// - 非强制清理会清空分片记录，强制清理会删除会话

use crate::uploader::chunk::{ChunkPlan, ChunkRecord, ChunkTable, SlotInsert};
use crate::uploader::classifier::MediaKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// 已初始化，尚无分片
    Initialized,
    /// 上传中
    Uploading,
    /// 全部分片已上传，等待合并清单
    AllChunksPresent,
    /// 已完成（终态）
    Completed,
}

/// 上传统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UploadStats {
    /// 累计尝试次数
    pub total_attempts: u64,
    /// 平均每个分片的尝试次数
    pub average_attempts_per_chunk: f64,
}

/// 上传会话
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// 会话ID
    pub id: String,
    /// 原始文件名
    pub original_name: String,
    /// 调用方声明的内容类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// 媒体类型
    pub media_kind: MediaKind,
    /// 目标存储桶
    pub bucket: String,
    /// 目标目录
    pub folder: String,
    /// 文件大小
    pub total_size: u64,
    /// 分片大小
    pub chunk_size: u64,
    /// 总分片数
    pub total_chunks: usize,
    /// 分片记录表
    pub chunks: ChunkTable,
    /// 进度百分比（派生字段）
    pub progress_percent: f64,
    /// 是否全部上传（派生字段）
    pub is_complete: bool,
    /// 清单公开地址（完成后设置）
    #[serde(default)]
    pub final_manifest_url: Option<String>,
    /// 清单存储路径
    #[serde(default)]
    pub manifest_path: Option<String>,
    /// 清单是否确认写入存储
    #[serde(default)]
    pub manifest_persisted: bool,
    /// 完成时间
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// 会话内最大并发分片数
    pub max_concurrency: usize,
    /// 单次分片上传超时（毫秒）
    pub chunk_timeout_ms: u64,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后更新时间
    pub updated_at: DateTime<Utc>,
}

/// 创建会话所需参数
#[derive(Debug, Clone)]
pub struct NewSession {
    pub original_name: String,
    pub content_type: Option<String>,
    pub media_kind: MediaKind,
    pub bucket: String,
    pub folder: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub max_concurrency: usize,
    pub chunk_timeout_ms: u64,
}

impl UploadSession {
    /// 创建新的上传会话
    pub fn new(params: NewSession, now: DateTime<Utc>) -> Self {
        let plan = ChunkPlan::new(params.total_size, params.chunk_size);
        let total_chunks = plan.chunk_count();
        Self {
            id: Uuid::new_v4().to_string(),
            original_name: params.original_name,
            content_type: params.content_type,
            media_kind: params.media_kind,
            bucket: params.bucket,
            folder: normalize_folder(&params.folder),
            total_size: params.total_size,
            chunk_size: plan.chunk_size(),
            total_chunks,
            chunks: ChunkTable::new(total_chunks),
            progress_percent: 0.0,
            is_complete: false,
            final_manifest_url: None,
            manifest_path: None,
            manifest_persisted: false,
            completed_at: None,
            max_concurrency: params.max_concurrency.max(1),
            chunk_timeout_ms: params.chunk_timeout_ms,
            created_at: now,
            updated_at: now,
        }
    }

    /// 分片切分方案
    pub fn plan(&self) -> ChunkPlan {
        ChunkPlan::new(self.total_size, self.chunk_size)
    }

    /// 会话对象在存储中的前缀
    pub fn storage_prefix(&self) -> String {
        if self.folder.is_empty() {
            self.id.clone()
        } else {
            format!("{}/{}", self.folder, self.id)
        }
    }

    /// 分片的存储路径（同一索引始终相同，重复写入是覆盖）
    pub fn chunk_storage_path(&self, index: usize) -> String {
        format!("{}/chunk_{:05}", self.storage_prefix(), index)
    }

    /// 清单的存储路径
    pub fn manifest_storage_path(&self) -> String {
        format!("{}/manifest.json", self.storage_prefix())
    }

    /// 文件格式（取原始文件扩展名，小写）
    pub fn format(&self) -> String {
        std::path::Path::new(&self.original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string())
    }

    /// 已上传分片数
    pub fn uploaded_count(&self) -> usize {
        self.chunks.uploaded_count()
    }

    /// 追加分片记录（已存在则忽略），并重新计算进度
    pub fn record_chunk(&mut self, record: ChunkRecord, now: DateTime<Utc>) -> SlotInsert {
        let result = self.chunks.insert_if_absent(record);
        if result == SlotInsert::Inserted {
            self.recompute_progress();
            self.updated_at = now;
        }
        result
    }

    /// 丢弃全部分片记录，进度回到 0
    pub fn reset_chunks(&mut self, now: DateTime<Utc>) {
        self.chunks.clear();
        self.recompute_progress();
        self.updated_at = now;
    }

    /// 重新计算派生字段
    pub fn recompute_progress(&mut self) {
        let uploaded = self.uploaded_count();
        self.progress_percent = if self.total_chunks == 0 {
            0.0
        } else {
            (uploaded as f64 / self.total_chunks as f64) * 100.0
        };
        self.is_complete = self.total_chunks > 0 && uploaded == self.total_chunks;
    }

    /// 当前状态
    pub fn state(&self) -> SessionState {
        if self.final_manifest_url.is_some() {
            SessionState::Completed
        } else if self.is_complete {
            SessionState::AllChunksPresent
        } else if self.uploaded_count() > 0 {
            SessionState::Uploading
        } else {
            SessionState::Initialized
        }
    }

    /// 上传统计
    pub fn stats(&self) -> UploadStats {
        let total_attempts = self.chunks.total_attempts();
        let uploaded = self.uploaded_count();
        let average_attempts_per_chunk = if uploaded == 0 {
            0.0
        } else {
            total_attempts as f64 / uploaded as f64
        };
        UploadStats {
            total_attempts,
            average_attempts_per_chunk,
        }
    }

    /// 标记为已完成
    pub fn mark_completed(
        &mut self,
        manifest_url: String,
        manifest_path: String,
        manifest_persisted: bool,
        now: DateTime<Utc>,
    ) {
        self.final_manifest_url = Some(manifest_url);
        self.manifest_path = Some(manifest_path);
        self.manifest_persisted = manifest_persisted;
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// 规范化目录：去掉首尾斜杠和空片段
pub fn normalize_folder(folder: &str) -> String {
    folder
        .split('/')
        .filter(|seg| !seg.trim().is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
