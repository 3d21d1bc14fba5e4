//! Redis 缓存层

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, error, info, instrument};

use analyzer_core::config::RedisTierConfig;
use analyzer_core::{AnalyzerError, AnalyzerResult};

use super::{CacheTier, TierEntry, TierKind};

/// 以 `SET .. PX` 写入、`GET` + `PTTL` 读出的L2缓存
#[derive(Clone)]
pub struct RedisTier {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisTier {
    /// 连接Redis并用 `PING` 验证
    pub async fn connect(config: &RedisTierConfig) -> AnalyzerResult<Self> {
        info!("连接Redis缓存: {}", config.redis_url);

        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| AnalyzerError::Cache(e.to_string()))?;

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| AnalyzerError::Cache(format!("连接Redis超时: {timeout:?}")))?
            .map_err(|e| AnalyzerError::Cache(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AnalyzerError::Cache(e.to_string()))?;

        info!("Redis缓存连接成功");
        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn build_key(&self, key: &str) -> String {
        build_key(&self.key_prefix, key)
    }
}

fn build_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

#[async_trait]
impl CacheTier for RedisTier {
    fn kind(&self) -> TierKind {
        TierKind::Redis
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> AnalyzerResult<Option<TierEntry>> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let (payload, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&full_key)
            .cmd("PTTL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis GET失败 {}: {}", full_key, e);
                AnalyzerError::Cache(e.to_string())
            })?;

        // PTTL: -2 键不存在, -1 没有过期时间
        match payload {
            Some(payload) if pttl != 0 && pttl != -2 => {
                debug!("Redis命中: {}", full_key);
                Ok(Some(TierEntry {
                    payload,
                    remaining_ttl: remaining_ttl(pttl),
                }))
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, payload))]
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> AnalyzerResult<bool> {
        let ttl_ms = ttl.as_millis().min(i64::MAX as u128) as i64;
        if ttl_ms <= 0 {
            return Ok(false);
        }
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("SET")
            .arg(&full_key)
            .arg(payload)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis SET失败 {}: {}", full_key, e);
                AnalyzerError::Cache(e.to_string())
            })?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> AnalyzerResult<bool> {
        let full_key = self.build_key(key);
        let mut conn = self.conn.clone();

        let deleted: i64 = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AnalyzerError::Cache(e.to_string()))?;
        Ok(deleted > 0)
    }

    /// 用 SCAN 找出本前缀下的全部键后分批删除
    #[instrument(skip(self))]
    async fn clear(&self) -> AnalyzerResult<usize> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    error!("Redis SCAN失败 {}: {}", pattern, e);
                    AnalyzerError::Cache(e.to_string())
                })?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        let mut deleted = 0;
        for chunk in keys.chunks(100) {
            let count: usize = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| AnalyzerError::Cache(e.to_string()))?;
            deleted += count;
        }
        debug!("Redis缓存清空: 删除 {} 个键", deleted);
        Ok(deleted)
    }
}

/// 把 PTTL 结果换成剩余时间；没有过期时间的键返回 None
fn remaining_ttl(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_building() {
        assert_eq!(build_key("analyzer:cache:", "abc"), "analyzer:cache:abc");
        assert_eq!(build_key("", "abc"), "abc");
    }

    #[test]
    fn test_remaining_ttl_from_pttl() {
        assert_eq!(remaining_ttl(1500), Some(Duration::from_millis(1500)));
        assert_eq!(remaining_ttl(-1), None);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_redis_fails() {
        let config = RedisTierConfig {
            enabled: true,
            redis_url: "redis://127.0.0.1:1".to_string(),
            key_prefix: "test:".to_string(),
            connection_timeout_seconds: 1,
        };
        assert!(matches!(
            RedisTier::connect(&config).await,
            Err(AnalyzerError::Cache(_))
        ));
    }
}
