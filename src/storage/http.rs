// HTTP 对象存储客户端
//
// 对接 REST 风格的对象存储服务：
// - 写入：POST {endpoint}/object/{bucket}/{path}（x-upsert: true，同路径重复写入覆盖）
// - 公开地址：{endpoint}/object/public/{bucket}/{path}
// - 批量删除：DELETE {endpoint}/object/{bucket}，body 为 {"prefixes": [...]}

use super::{validate_object_path, StorageBackend, StorageError, StorageErrorKind};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

/// 批量删除请求体
#[derive(Debug, Serialize)]
struct RemoveRequest<'a> {
    prefixes: &'a [String],
}

/// HTTP 对象存储客户端
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    endpoint: String,
}

impl HttpStorage {
    /// 创建客户端
    ///
    /// 超时由上传引擎按操作控制，这里只设置连接超时
    pub fn new(endpoint: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .context("存储服务密钥包含非法字符")?,
            );
            headers.insert(
                "apikey",
                HeaderValue::from_str(&key).context("存储服务密钥包含非法字符")?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// 对路径逐段做 URL 编码（保留分隔符）
    fn encode_path(path: &str) -> String {
        path.split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.endpoint,
            urlencoding::encode(bucket),
            Self::encode_path(path)
        )
    }

    /// 把响应状态转换为存储错误（只保留状态码，不透出响应正文）
    async fn check_response(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<(), StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        debug!("{} 响应正文: {}", operation, body);
        Err(StorageError::new(
            StorageErrorKind::from_status(status.as_u16()),
            format!("{} 失败，HTTP {}", operation, status.as_u16()),
        ))
    }
}

/// reqwest 错误分类
fn classify_request_error(error: &reqwest::Error) -> StorageErrorKind {
    if error.is_timeout() {
        StorageErrorKind::Timeout
    } else if error.is_connect() || error.is_request() || error.is_body() {
        StorageErrorKind::Network
    } else if let Some(status) = error.status() {
        StorageErrorKind::from_status(status.as_u16())
    } else {
        StorageErrorKind::Unknown
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::new(classify_request_error(&e), e.to_string())
    }
}

#[async_trait]
impl StorageBackend for HttpStorage {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_object_path(path)?;
        let url = self.object_url(bucket, path);
        debug!("上传对象: {} ({} bytes)", url, data.len());

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(data)
            .send()
            .await?;

        Self::check_response(response, "上传对象").await?;
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/object/public/{}/{}",
            self.endpoint,
            urlencoding::encode(bucket),
            Self::encode_path(path)
        )
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!("{}/object/{}", self.endpoint, urlencoding::encode(bucket));
        let response = self
            .client
            .delete(&url)
            .json(&RemoveRequest { prefixes: paths })
            .send()
            .await?;

        if let Err(e) = Self::check_response(response, "批量删除对象").await {
            warn!("批量删除 {} 个对象失败: {}", paths.len(), e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_encoding() {
        let storage = HttpStorage::new("https://store.example.com/storage/v1/", None).unwrap();
        assert_eq!(
            storage.public_url("videos", "my folder/abc/chunk_00001"),
            "https://store.example.com/storage/v1/object/public/videos/my%20folder/abc/chunk_00001"
        );
        assert_eq!(
            storage.object_url("videos", "a/b"),
            "https://store.example.com/storage/v1/object/videos/a/b"
        );
    }

    #[test]
    fn test_invalid_api_key_rejected() {
        assert!(HttpStorage::new("https://x", Some("bad\nkey".to_string())).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retriable() {
        // 端口 1 上通常没有服务，连接会被拒绝
        let storage = HttpStorage::new("http://127.0.0.1:1", None).unwrap();
        let err = storage
            .put("videos", "a/b", Bytes::from_static(b"x"), "application/octet-stream")
            .await
            .unwrap_err();
        assert!(err.is_retriable(), "unexpected kind: {}", err.kind());
    }
}
