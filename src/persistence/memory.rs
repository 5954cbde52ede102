// 内存会话存储

use super::{SessionRepository, SessionStoreError};
use crate::uploader::UploadSession;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// 基于 DashMap 的内存会话存储
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前会话数
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), SessionStoreError> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(SessionStoreError::AlreadyExists(session.id.clone())),
            Entry::Vacant(v) => {
                v.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UploadSession>, SessionStoreError> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn save(&self, session: &UploadSession) -> Result<(), SessionStoreError> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, SessionStoreError> {
        Ok(self.sessions.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::{MediaKind, NewSession};
    use chrono::Utc;

    fn session() -> UploadSession {
        UploadSession::new(
            NewSession {
                original_name: "a.mp4".to_string(),
                content_type: None,
                media_kind: MediaKind::Video,
                bucket: "videos".to_string(),
                folder: String::new(),
                total_size: 10,
                chunk_size: 4,
                max_concurrency: 1,
                chunk_timeout_ms: 1000,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_crud() {
        let store = MemorySessionStore::new();
        let s = session();

        store.create(&s).await.unwrap();
        assert!(matches!(
            store.create(&s).await,
            Err(SessionStoreError::AlreadyExists(_))
        ));

        let mut loaded = store.find_by_id(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_chunks, 3);

        loaded.bucket = "other".to_string();
        store.save(&loaded).await.unwrap();
        assert_eq!(store.find_by_id(&s.id).await.unwrap().unwrap().bucket, "other");

        assert!(store.delete_by_id(&s.id).await.unwrap());
        assert!(!store.delete_by_id(&s.id).await.unwrap());
        assert!(store.find_by_id(&s.id).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
