// 内存对象存储

use super::{validate_object_path, StorageBackend, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// 内存中的对象
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// 内存对象存储
///
/// 以 `bucket/path` 为键保存对象，克隆后共享同一份数据
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    objects: Arc<DashMap<String, StoredObject>>,
    public_base_url: String,
}

impl MemoryStorage {
    pub fn new(public_base_url: &str) -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn key(bucket: &str, path: &str) -> String {
        format!("{}/{}", bucket, path)
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.objects
            .get(&Self::key(bucket, path))
            .map(|o| o.value().clone())
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects.contains_key(&Self::key(bucket, path))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_object_path(path)?;
        debug!("写入内存对象: {}/{} ({} bytes)", bucket, path, data.len());
        self.objects.insert(
            Self::key(bucket, path),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            self.objects.remove(&Self::key(bucket, path));
        }
        Ok(())
    }
}
