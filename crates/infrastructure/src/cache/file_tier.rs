use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use analyzer_core::config::FileTierConfig;
use analyzer_core::{AnalyzerError, AnalyzerResult};

use super::{CacheTier, TierEntry, TierKind};

const FILE_EXTENSION: &str = "json";

/// 文件缓存层，只保存序列化后不小于 `min_size_bytes` 的值
///
/// 文件名为键的SHA-256，过期时间按墙上时间记录，进程重启后依然有效。
#[derive(Debug, Clone)]
pub struct FileTier {
    directory: PathBuf,
    min_size_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEnvelope {
    key: String,
    expires_at_ms: i64,
    payload: String,
}

impl FileTier {
    pub async fn open(config: &FileTierConfig) -> AnalyzerResult<Self> {
        Self::with_directory(&config.directory, config.min_size_bytes).await
    }

    pub async fn with_directory(
        directory: impl AsRef<Path>,
        min_size_bytes: usize,
    ) -> AnalyzerResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;
        debug!("文件缓存目录: {}", directory.display());
        Ok(Self {
            directory,
            min_size_bytes,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.directory.join(format!("{digest}.{FILE_EXTENSION}"))
    }

    async fn read_envelope(path: &Path) -> AnalyzerResult<Option<FileEnvelope>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(path: &Path) -> AnalyzerResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn cache_files(&self) -> AnalyzerResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl CacheTier for FileTier {
    fn kind(&self) -> TierKind {
        TierKind::File
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> AnalyzerResult<Option<TierEntry>> {
        let path = self.path_for(key);
        let Some(envelope) = Self::read_envelope(&path).await? else {
            return Ok(None);
        };
        if envelope.key != key {
            warn!("文件缓存键冲突: {}", path.display());
            return Ok(None);
        }

        let now_ms = Utc::now().timestamp_millis();
        if envelope.expires_at_ms <= now_ms {
            Self::remove_file(&path).await?;
            return Ok(None);
        }

        Ok(Some(TierEntry {
            payload: envelope.payload.into_bytes(),
            remaining_ttl: Some(Duration::from_millis(
                (envelope.expires_at_ms - now_ms) as u64,
            )),
        }))
    }

    #[instrument(skip(self, payload))]
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> AnalyzerResult<bool> {
        if payload.len() < self.min_size_bytes {
            return Ok(false);
        }
        let payload = String::from_utf8(payload.to_vec())
            .map_err(|e| AnalyzerError::Serialization(e.to_string()))?;
        let ttl_ms = ttl.as_millis().min(i64::MAX as u128 / 2) as i64;
        let envelope = FileEnvelope {
            key: key.to_string(),
            expires_at_ms: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            payload,
        };

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(&envelope)?).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> AnalyzerResult<bool> {
        Self::remove_file(&self.path_for(key)).await
    }

    async fn clear(&self) -> AnalyzerResult<usize> {
        let mut removed = 0;
        for path in self.cache_files().await? {
            if Self::remove_file(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn sweep_expired(&self) -> AnalyzerResult<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let mut removed = 0;
        for path in self.cache_files().await? {
            let expired = match Self::read_envelope(&path).await {
                Ok(Some(envelope)) => envelope.expires_at_ms <= now_ms,
                Ok(None) => false,
                // 无法解析的文件同样清理掉
                Err(_) => true,
            };
            if expired && Self::remove_file(&path).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("文件缓存清理过期条目 {} 个", removed);
        }
        Ok(removed)
    }
}
