// 媒体类型识别与存储桶路由
//
// 识别规则按固定优先级依次匹配：
// 1. ContentType：内容类型明确属于目标媒体类型（如 video/mp4）
// 2. Extension：未提供内容类型，但扩展名可识别
// 3. GenericTypeWithExtension：内容类型为通用二进制类型（如 application/octet-stream），
//    但扩展名可识别（常见于 mkv 等被浏览器误报的容器格式）
//
// 内容类型明确指向其他类型（如 text/plain、image/png 搭配 .mp4）时不匹配

use crate::config::MediaConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// 通用二进制内容类型
const GENERIC_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "application/binary",
    "application/x-binary",
    "application/unknown",
];

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// 内容类型的主类型（video/*、image/*）
    pub fn top_level_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.top_level_type())
    }
}

/// 命中的识别规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    ContentType,
    Extension,
    GenericTypeWithExtension,
}

/// 待识别的文件元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// 原始文件名
    pub original_name: String,
    /// 调用方声明的内容类型
    #[serde(default)]
    pub content_type: Option<String>,
    /// 文件大小（字节）
    pub size: u64,
}

impl FileMeta {
    pub fn new(original_name: impl Into<String>, content_type: Option<&str>, size: u64) -> Self {
        Self {
            original_name: original_name.into(),
            content_type: content_type.map(|s| s.to_string()),
            size,
        }
    }

    /// 小写扩展名
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// 解析后的内容类型（空字符串视为未提供）
    fn mime(&self) -> Option<Result<mime::Mime, ()>> {
        let raw = self.content_type.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(raw.parse::<mime::Mime>().map_err(|_| ()))
    }
}

/// 识别结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: MediaKind,
    pub rule: MatchRule,
}

/// 媒体类型识别器
pub trait MediaClassifier: Send + Sync {
    /// 识别文件，不属于目标类型时返回 None
    fn classify(&self, meta: &FileMeta) -> Option<Classification>;
}

/// 基于内容类型 + 扩展名规则的识别器
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    kind: MediaKind,
    extensions: HashSet<String>,
}

impl RuleBasedClassifier {
    pub fn new<I, S>(kind: MediaKind, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            kind,
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// 视频识别器
    pub fn video(config: &MediaConfig) -> Self {
        Self::new(MediaKind::Video, &config.video_extensions)
    }

    /// 图片识别器
    pub fn image(config: &MediaConfig) -> Self {
        Self::new(MediaKind::Image, &config.image_extensions)
    }

    fn has_known_extension(&self, meta: &FileMeta) -> bool {
        meta.extension()
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }
}

fn is_generic(mime: &mime::Mime) -> bool {
    let essence = mime.essence_str().to_ascii_lowercase();
    GENERIC_CONTENT_TYPES.contains(&essence.as_str())
}

impl MediaClassifier for RuleBasedClassifier {
    fn classify(&self, meta: &FileMeta) -> Option<Classification> {
        let rule = match meta.mime() {
            // 规则1：内容类型明确匹配
            Some(Ok(m)) if m.type_().as_str().eq_ignore_ascii_case(self.kind.top_level_type()) => {
                Some(MatchRule::ContentType)
            }
            // 规则2：未提供内容类型，按扩展名识别
            None if self.has_known_extension(meta) => Some(MatchRule::Extension),
            // 规则3：通用二进制类型 + 可识别扩展名
            Some(Ok(m)) if is_generic(&m) && self.has_known_extension(meta) => {
                Some(MatchRule::GenericTypeWithExtension)
            }
            _ => None,
        }?;

        Some(Classification {
            kind: self.kind,
            rule,
        })
    }
}

/// 按顺序尝试多个识别器，返回第一个匹配结果
pub struct ChainClassifier {
    classifiers: Vec<Box<dyn MediaClassifier>>,
}

impl ChainClassifier {
    pub fn new(classifiers: Vec<Box<dyn MediaClassifier>>) -> Self {
        Self { classifiers }
    }
}

impl MediaClassifier for ChainClassifier {
    fn classify(&self, meta: &FileMeta) -> Option<Classification> {
        self.classifiers.iter().find_map(|c| c.classify(meta))
    }
}

/// 存储桶路由
///
/// 优先级：目录映射 > 媒体类型对应的存储桶 > 默认存储桶
#[derive(Debug, Clone)]
pub struct BucketRouter {
    config: MediaConfig,
}

impl BucketRouter {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn route(&self, kind: MediaKind, folder: &str) -> String {
        let top_folder = folder.trim_matches('/').split('/').next().unwrap_or("");
        if let Some(bucket) = self.config.folder_buckets.get(top_folder) {
            return bucket.clone();
        }

        let by_kind = match kind {
            MediaKind::Video => &self.config.video_bucket,
            MediaKind::Image => &self.config.image_bucket,
        };
        if by_kind.trim().is_empty() {
            self.config.default_bucket.clone()
        } else {
            by_kind.clone()
        }
    }
}
