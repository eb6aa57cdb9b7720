//! Redis-backed window store shared by every process.
//!
//! Each key is a sorted set (`rate_limit:{vendor}`) whose members are unique
//! marker ids scored by their admission timestamp in milliseconds. The whole
//! evict + count + insert unit runs as one Lua script, so concurrent callers
//! cannot interleave between the count and the insert.

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::RateLimitError;
use super::window::{WindowSnapshot, WindowStore};

const ACQUIRE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    count = count + 1
    admitted = 1
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = -1
if oldest[2] then
    oldest_score = tonumber(oldest[2])
end
return {admitted, count, oldest_score}
"#;

const COUNT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', tonumber(ARGV[1]) - tonumber(ARGV[2]))
return redis.call('ZCARD', KEYS[1])
"#;

pub struct RedisWindowStore {
    connection: ConnectionManager,
    acquire: Script,
    count: Script,
}

impl RedisWindowStore {
    pub async fn connect(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::Storage(format!("invalid redis url: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::Storage(format!("redis connection failed: {e}")))?;
        debug!("connected to redis for rate limiting");
        Ok(Self::new(connection))
    }

    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            acquire: Script::new(ACQUIRE_SCRIPT),
            count: Script::new(COUNT_SCRIPT),
        }
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<WindowSnapshot, RateLimitError> {
        let mut conn = self.connection.clone();
        let member = format!("{now_ms}-{}", uuid::Uuid::now_v7());
        let reply: Vec<i64> = self
            .acquire
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Storage(format!("rate limit script failed: {e}")))?;

        match reply.as_slice() {
            [admitted, count, oldest] => Ok(WindowSnapshot {
                admitted: *admitted == 1,
                count: u32::try_from(*count).unwrap_or(u32::MAX),
                oldest_ms: (*oldest >= 0).then_some(*oldest),
            }),
            other => Err(RateLimitError::Storage(format!(
                "unexpected rate limit script reply: {other:?}"
            ))),
        }
    }

    async fn count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u32, RateLimitError> {
        let mut conn = self.connection.clone();
        let count: i64 = self
            .count
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Storage(format!("rate limit count failed: {e}")))?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
