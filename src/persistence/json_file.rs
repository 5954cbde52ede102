//! JSON 文件会话存储
//!
//! 每个会话保存为 `{session_dir}/{session_id}.session.json`。
//! 写入先落到 `.session.json.tmp` 临时文件再原子重命名，防止写入中断导致文件损坏。
//! 文件读写是阻塞操作，放到 `spawn_blocking` 中执行。

use super::{validate_session_id, SessionRepository, SessionStoreError};
use crate::uploader::UploadSession;
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 会话文件后缀
const SESSION_EXTENSION: &str = "session.json";

/// JSON 文件会话存储
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    dir: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, id: &str) -> Result<PathBuf, SessionStoreError> {
        validate_session_id(id)?;
        Ok(self.dir.join(format!("{}.{}", id, SESSION_EXTENSION)))
    }
}

// ============================================================================
// 阻塞文件操作
// ============================================================================

fn write_session(path: &Path, session: &UploadSession) -> Result<(), SessionStoreError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            debug!("已创建会话目录: {:?}", parent);
        }
    }

    let temp_path = path.with_extension("json.tmp");
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, session)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    debug!("已保存会话: {:?} (session_id={})", path, session.id);
    Ok(())
}

fn read_session(path: &Path) -> Result<Option<UploadSession>, SessionStoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let session: UploadSession = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(session))
}

fn remove_session(path: &Path) -> Result<bool, SessionStoreError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("已删除会话文件: {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, SessionStoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SessionStoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionStoreError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

#[async_trait]
impl SessionRepository for JsonFileSessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), SessionStoreError> {
        let path = self.session_path(&session.id)?;
        if path.exists() {
            return Err(SessionStoreError::AlreadyExists(session.id.clone()));
        }
        let session = session.clone();
        run_blocking(move || write_session(&path, &session)).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UploadSession>, SessionStoreError> {
        let path = self.session_path(id)?;
        run_blocking(move || read_session(&path)).await
    }

    async fn save(&self, session: &UploadSession) -> Result<(), SessionStoreError> {
        let path = self.session_path(&session.id)?;
        let session = session.clone();
        run_blocking(move || write_session(&path, &session)).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, SessionStoreError> {
        let path = self.session_path(id)?;
        run_blocking(move || remove_session(&path)).await
    }
}
