// Media Chunk Uploader Library
// 大文件分片上传核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 会话持久化模块
pub mod persistence;

// 对象存储模块
pub mod storage;

// 分片上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::AppConfig;
pub use persistence::{JsonFileSessionStore, MemorySessionStore, SessionRepository};
pub use storage::{HttpStorage, LocalFsStorage, MemoryStorage, StorageBackend, StorageError};
pub use uploader::{
    CompletionResult, FileMeta, FileUploadOutcome, MediaKind, ProgressReport, UploadError,
    UploadManager, UploadSession,
};
