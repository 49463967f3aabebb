use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use stampede_core::{BackendError, BackendResult};

use crate::commands::Commands;

fn storage(err: redis::RedisError) -> BackendError {
    BackendError::storage(err.to_string())
}

/// Redis-backed implementation of [`Commands`].
///
/// All operations share one multiplexed connection; any call may block on
/// network I/O and respects caller cancellation at its await points.
pub struct RedisCommands {
    manager: ConnectionManager,
}

impl RedisCommands {
    /// Connects to `host` on the fixed control-plane port 6379.
    pub async fn connect(host: &str) -> BackendResult<Self> {
        let client = redis::Client::open(format!("redis://{host}:6379"))
            .map_err(|e| BackendError::storage(format!("Error creating redis client: {e}")))?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| BackendError::storage(format!("Error connecting to redis: {e}")))?;

        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl Commands for RedisCommands {
    async fn list_length(&self, key: &str) -> BackendResult<i64> {
        self.conn().llen(key).await.map_err(storage)
    }

    async fn list_push_bytes(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let _: i64 = self.conn().rpush(key, value).await.map_err(storage)?;
        Ok(())
    }

    async fn list_push_int(&self, key: &str, value: i64) -> BackendResult<()> {
        let _: i64 = self.conn().rpush(key, value).await.map_err(storage)?;
        Ok(())
    }

    async fn list_pop_bytes(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.conn().lpop(key, None).await.map_err(storage)
    }

    async fn list_pop_int(&self, key: &str) -> BackendResult<Option<i64>> {
        self.conn().lpop(key, None).await.map_err(storage)
    }

    async fn get_bytes(&self, key: &str) -> BackendResult<Vec<u8>> {
        let value: Option<Vec<u8>> = self.conn().get(key).await.map_err(storage)?;
        value.ok_or(BackendError::NotFound)
    }

    async fn get_float(&self, key: &str) -> BackendResult<f64> {
        let value: Option<f64> = self.conn().get(key).await.map_err(storage)?;
        value.ok_or(BackendError::NotFound)
    }

    async fn set_bytes(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        match ttl {
            Some(ttl) => {
                let _: () = self
                    .conn()
                    .set_ex(key, value, ttl.as_secs())
                    .await
                    .map_err(storage)?;
            }
            None => {
                let _: () = self.conn().set(key, value).await.map_err(storage)?;
            }
        }
        Ok(())
    }

    async fn set_float(&self, key: &str, value: f64, ttl: Option<Duration>) -> BackendResult<()> {
        match ttl {
            Some(ttl) => {
                let _: () = self
                    .conn()
                    .set_ex(key, value, ttl.as_secs())
                    .await
                    .map_err(storage)?;
            }
            None => {
                let _: () = self.conn().set(key, value).await.map_err(storage)?;
            }
        }
        Ok(())
    }

    async fn add_to_set(&self, key: &str, score: f64) -> BackendResult<()> {
        let member = Uuid::new_v4().to_string();
        let _: i64 = self
            .conn()
            .zadd(key, member, score)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn get_min(&self, key: &str) -> BackendResult<f64> {
        let scores: Vec<(String, f64)> = self
            .conn()
            .zrange_withscores(key, 0, 0)
            .await
            .map_err(storage)?;

        // An empty sorted set does not exist in Redis, so no members means
        // the set is absent.
        match scores.first() {
            Some((_, score)) => Ok(*score),
            None => Err(BackendError::NotFound),
        }
    }

    async fn get_max(&self, key: &str) -> BackendResult<f64> {
        let scores: Vec<(String, f64)> = self
            .conn()
            .zrange_withscores(key, -1, -1)
            .await
            .map_err(storage)?;

        Ok(scores.first().map_or(0.0, |(_, score)| *score))
    }

    async fn get_median(&self, key: &str) -> BackendResult<f64> {
        let len: i64 = self.conn().zcard(key).await.map_err(storage)?;

        if len == 0 {
            return Ok(0.0);
        }

        let index = (len / 2) as isize;
        let scores: Vec<(String, f64)> = self
            .conn()
            .zrange_withscores(key, index, index)
            .await
            .map_err(storage)?;

        Ok(scores.first().map_or(0.0, |(_, score)| *score))
    }

    async fn get_cardinality(&self, key: &str) -> BackendResult<i64> {
        self.conn().zcard(key).await.map_err(storage)
    }

    async fn range_count(&self, key: &str, min: f64, max: f64) -> BackendResult<i64> {
        let min_arg = if min < 0.0 {
            "-inf".to_string()
        } else {
            min.to_string()
        };
        let max_arg = if max < 0.0 {
            "+inf".to_string()
        } else {
            max.to_string()
        };

        redis::cmd("ZCOUNT")
            .arg(key)
            .arg(min_arg)
            .arg(max_arg)
            .query_async(&mut self.conn())
            .await
            .map_err(storage)
    }

    async fn increment_counter(&self, key: &str, amount: f64) -> BackendResult<()> {
        let _: f64 = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(amount)
            .query_async(&mut self.conn())
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn map_set_key(&self, map: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        let _: i64 = self.conn().hset(map, key, value).await.map_err(storage)?;
        Ok(())
    }

    async fn map_get_key_bytes(&self, map: &str, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.conn().hget(map, key).await.map_err(storage)
    }

    async fn map_get_keys(&self, map: &str) -> BackendResult<Vec<String>> {
        self.conn().hkeys(map).await.map_err(storage)
    }

    async fn map_key_delete(&self, map: &str, key: &str) -> BackendResult<()> {
        let _: i64 = self.conn().hdel(map, key).await.map_err(storage)?;
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        // The connection manager tears down with the process.
        Ok(())
    }
}
