use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::{CacheStore, StoreError, StoreResult, WindowCheck, WindowOutcome};
use crate::metrics::track_cache_operation;

// KEYS[1] sorted set of admitted request instants, KEYS[2] block marker.
// Returns {1, count} admitted, {0, count} rejected (block placed),
// {-1, remaining_ms} still blocked.
const SLIDING_WINDOW_SCRIPT: &str = r#"
    local counter_key = KEYS[1]
    local block_key = KEYS[2]
    local now = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])
    local limit = tonumber(ARGV[3])
    local block = tonumber(ARGV[4])
    local member = ARGV[5]

    local blocked_until = redis.call('GET', block_key)
    if blocked_until then
        blocked_until = tonumber(blocked_until)
        if blocked_until > now then
            return {-1, blocked_until - now}
        end
    end

    redis.call('ZREMRANGEBYSCORE', counter_key, '-inf', '(' .. (now - window))
    local count = redis.call('ZCARD', counter_key)

    if count >= limit then
        redis.call('SET', block_key, now + block, 'PX', block)
        return {0, count}
    end

    redis.call('ZADD', counter_key, now, member)
    redis.call('PEXPIRE', counter_key, window)
    return {1, count + 1}
"#;

pub struct RedisCache {
    redis: ConnectionManager,
}

impl RedisCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.redis.clone();
        track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl.as_secs().max(1))
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await
    }

    async fn check_window(&self, check: &WindowCheck<'_>) -> StoreResult<WindowOutcome> {
        let mut conn = self.redis.clone();
        let reply: Vec<i64> = track_cache_operation("sliding_window", async {
            redis::Script::new(SLIDING_WINDOW_SCRIPT)
                .key(check.counter_key)
                .key(check.block_key)
                .arg(check.now_ms)
                .arg(check.window_ms)
                .arg(check.limit)
                .arg(check.block_ms.max(1))
                .arg(check.member)
                .invoke_async(&mut conn)
                .await
                .map_err(unavailable)
        })
        .await?;

        match reply.as_slice() {
            [1, count] => Ok(WindowOutcome::Admitted {
                count: *count as u32,
            }),
            [0, _] => Ok(WindowOutcome::Rejected),
            [-1, remaining] => Ok(WindowOutcome::Blocked {
                remaining_ms: *remaining,
            }),
            other => Err(StoreError::Serialization(format!(
                "unexpected sliding window reply: {:?}",
                other
            ))),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }
}
