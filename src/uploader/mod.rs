// 分片上传引擎模块
//
// - 分片切分与分片记录表（固定大小、按索引写入）
// - 媒体类型识别与存储桶路由
// - 带超时、指数退避的分片上传
// - 批次并发调度（失败即整批失败并清理）
// - 清单合并、清理、进度查询

pub mod assembler;
pub mod chunk;
pub mod classifier;
pub mod cleanup;
pub mod context;
pub mod error;
pub mod manager;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{CompletionAssembler, CompletionResult, Manifest, ManifestChunk};
pub use chunk::{ChunkPlan, ChunkRecord, ChunkTable, SlotInsert};
pub use classifier::{
    BucketRouter, ChainClassifier, Classification, FileMeta, MatchRule, MediaClassifier,
    MediaKind, RuleBasedClassifier,
};
pub use cleanup::{CleanupOutcome, SessionCleaner};
pub use context::{SessionGuard, SessionLocks, UploadContext};
pub use error::{PermanentTransferError, UploadError, UploadResult};
pub use manager::{FileUploadOutcome, InitializeOutcome, UploadManager};
pub use progress::ProgressReport;
pub use retry::{Clock, RetryPolicy, TokioClock};
pub use scheduler::{BatchScheduler, UploadAllOutcome};
pub use session::{NewSession, SessionState, UploadSession, UploadStats};
pub use worker::{ChunkStatus, ChunkUploadOutcome, ChunkWorker};
