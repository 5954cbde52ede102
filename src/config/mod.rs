// 配置管理模块
//
// 所有参数通过显式的配置值对象传入上传管理器，不读取任何全局状态

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 媒体分类与存储桶路由配置
    #[serde(default)]
    pub media: MediaConfig,
    /// 对象存储配置
    #[serde(default)]
    pub storage: StorageConfig,
    /// 会话存储配置
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

// =====================================================
// 上传配置
// =====================================================

/// 上传配置
///
/// 字段名与对外文档中的配置项一一对应（chunkSizeBytes、maxConcurrentChunks 等）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小（字节）
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,
    /// 单个会话内最大并发分片数（即每批分片数）
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    /// 单个分片最大尝试次数（含首次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// 退避抖动上限（毫秒），0 表示不加抖动
    #[serde(default = "default_retry_max_jitter_ms")]
    pub retry_max_jitter_ms: u64,
    /// 单次分片上传超时（毫秒）
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
    /// 清单写入、批量删除等存储操作的超时（毫秒）
    #[serde(default = "default_storage_operation_timeout_ms")]
    pub storage_operation_timeout_ms: u64,
    /// 分片阈值（字节）：小于该大小的文件直接单次上传
    #[serde(default = "default_chunk_threshold_bytes")]
    pub chunk_threshold_bytes: u64,
    /// 批次之间的固定间隔（毫秒）
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

fn default_chunk_size_bytes() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_concurrent_chunks() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_max_jitter_ms() -> u64 {
    1000
}

fn default_chunk_timeout_ms() -> u64 {
    120_000
}

fn default_storage_operation_timeout_ms() -> u64 {
    30_000
}

fn default_chunk_threshold_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_batch_pause_ms() -> u64 {
    100
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size_bytes(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_max_jitter_ms: default_retry_max_jitter_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            storage_operation_timeout_ms: default_storage_operation_timeout_ms(),
            chunk_threshold_bytes: default_chunk_threshold_bytes(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl UploadConfig {
    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            anyhow::bail!("chunk_size_bytes 必须大于 0");
        }
        if self.max_concurrent_chunks == 0 {
            anyhow::bail!("max_concurrent_chunks 必须至少为 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries 必须至少为 1（包含首次尝试）");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!(
                "retry_base_delay_ms ({}) 不能大于 retry_max_delay_ms ({})",
                self.retry_base_delay_ms,
                self.retry_max_delay_ms
            );
        }
        if self.chunk_timeout_ms == 0 || self.storage_operation_timeout_ms == 0 {
            anyhow::bail!("超时时间必须大于 0");
        }
        Ok(())
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn storage_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_operation_timeout_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// 文件是否需要走分片上传
    pub fn requires_chunking(&self, total_size: u64) -> bool {
        total_size >= self.chunk_threshold_bytes
    }
}

// =====================================================
// 媒体配置
// =====================================================

/// 媒体分类与存储桶路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// 视频存储桶
    #[serde(default = "default_video_bucket")]
    pub video_bucket: String,
    /// 图片存储桶
    #[serde(default = "default_image_bucket")]
    pub image_bucket: String,
    /// 默认存储桶（无法按类型路由时使用）
    #[serde(default = "default_bucket")]
    pub default_bucket: String,
    /// 按目录指定存储桶（目录 -> 存储桶），优先级最高
    #[serde(default)]
    pub folder_buckets: HashMap<String, String>,
    /// 可识别的视频扩展名（小写，不含点）
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    /// 可识别的图片扩展名（小写，不含点）
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_video_bucket() -> String {
    "videos".to_string()
}

fn default_image_bucket() -> String {
    "images".to_string()
}

fn default_bucket() -> String {
    "uploads".to_string()
}

fn default_video_extensions() -> Vec<String> {
    ["mp4", "mov", "m4v", "mkv", "webm", "avi", "wmv", "flv", "mpeg", "mpg", "3gp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp", "heic"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_bucket: default_video_bucket(),
            image_bucket: default_image_bucket(),
            default_bucket: default_bucket(),
            folder_buckets: HashMap::new(),
            video_extensions: default_video_extensions(),
            image_extensions: default_image_extensions(),
        }
    }
}

// =====================================================
// 存储配置
// =====================================================

/// 对象存储后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// 进程内存（仅用于开发调试）
    Memory,
    /// 本地文件系统
    Local,
    /// HTTP 对象存储服务
    Http,
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 后端类型
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackendKind,
    /// 本地存储根目录
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// 公开访问地址前缀（本地/内存后端生成 URL 使用）
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// HTTP 存储服务地址
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP 存储服务密钥
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_storage_backend() -> StorageBackendKind {
    StorageBackendKind::Local
}

fn default_local_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/storage".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local_root: default_local_root(),
            public_base_url: default_public_base_url(),
            endpoint: None,
            api_key: None,
        }
    }
}

/// 会话存储后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    Memory,
    Json,
}

/// 会话存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    #[serde(default = "default_session_store_kind")]
    pub backend: SessionStoreKind,
    /// JSON 会话文件目录
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
}

fn default_session_store_kind() -> SessionStoreKind {
    SessionStoreKind::Json
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_session_store_kind(),
            session_dir: default_session_dir(),
        }
    }
}

// =====================================================
// 日志配置
// =====================================================

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .upload
            .validate()
            .context("配置文件中的上传参数校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload
            .validate()
            .context("保存配置失败：上传参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upload_config() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_concurrent_chunks, 2);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upload_config_validation() {
        let config = UploadConfig {
            chunk_size_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UploadConfig {
            max_concurrent_chunks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UploadConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UploadConfig {
            retry_base_delay_ms: 20_000,
            retry_max_delay_ms: 10_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_threshold_boundary() {
        let config = UploadConfig {
            chunk_threshold_bytes: 1000,
            ..Default::default()
        };
        assert!(!config.requires_chunking(999));
        assert!(config.requires_chunking(1000));
        assert!(config.requires_chunking(5000));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [upload]
            chunk_size_bytes = 1048576
            max_concurrent_chunks = 4

            [media]
            video_bucket = "clips"

            [media.folder_buckets]
            avatars = "profile-media"
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.upload.chunk_size_bytes, 1024 * 1024);
        assert_eq!(config.upload.max_concurrent_chunks, 4);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.media.video_bucket, "clips");
        assert_eq!(config.media.image_bucket, "images");
        assert_eq!(
            config.media.folder_buckets.get("avatars").map(String::as_str),
            Some("profile-media")
        );
        assert_eq!(config.storage.backend, StorageBackendKind::Local);
        assert_eq!(config.session_store.backend, SessionStoreKind::Json);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.upload.max_retries = 5;
        config.storage.backend = StorageBackendKind::Memory;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.max_retries, 5);
        assert_eq!(loaded.storage.backend, StorageBackendKind::Memory);
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default("/nonexistent/path/app.toml").await;
        assert_eq!(config.upload.max_concurrent_chunks, 2);
    }
}
