//! Redis-backed searching pool and locks
//!
//! Lets several service instances share one pool. Key layout under a
//! configurable prefix `P`:
//!
//! - `P:pool` sorted set of member ids, scored by enrolment sequence
//! - `P:pool:seq` enrolment counter
//! - `P:record:{id}` JSON search record with a millisecond TTL
//! - `P:lock:{id}` lock owner token, set with `NX PX`
//!
//! Record and lock expiry is left to Redis. A pool member whose record key
//! has expired is invisible to readers until `purge_expired` drops it.

use super::{LockManager, MatchLock, SearchPool};
use crate::error::{MatchError, Result};
use crate::types::{ParticipantId, SearchRecord};
use crate::utils;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::{debug, info};

const ENROLL_SCRIPT: &str = r#"
local seq = redis.call('INCR', KEYS[3])
if redis.call('EXISTS', KEYS[2]) == 1 then
  redis.call('ZADD', KEYS[1], 'NX', seq, ARGV[1])
else
  redis.call('ZADD', KEYS[1], seq, ARGV[1])
end
redis.call('SET', KEYS[2], ARGV[2], 'PX', ARGV[3])
return 1
"#;

const LIVE_MEMBERS_SCRIPT: &str = r#"
local live = {}
for _, id in ipairs(redis.call('ZRANGE', KEYS[1], 0, -1)) do
  if redis.call('EXISTS', ARGV[1] .. id) == 1 then
    table.insert(live, id)
  end
end
return live
"#;

const PURGE_SCRIPT: &str = r#"
local dropped = 0
for _, id in ipairs(redis.call('ZRANGE', KEYS[1], 0, -1)) do
  if redis.call('EXISTS', ARGV[1] .. id) == 0 then
    redis.call('ZREM', KEYS[1], id)
    dropped = dropped + 1
  end
end
return dropped
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Key names for everything the service keeps in Redis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool(&self) -> String {
        format!("{}:pool", self.prefix)
    }

    pub fn pool_sequence(&self) -> String {
        format!("{}:pool:seq", self.prefix)
    }

    pub fn record_prefix(&self) -> String {
        format!("{}:record:", self.prefix)
    }

    pub fn record(&self, participant_id: &str) -> String {
        format!("{}{}", self.record_prefix(), participant_id)
    }

    pub fn lock(&self, participant_id: &str) -> String {
        format!("{}:lock:{}", self.prefix, participant_id)
    }

    pub fn status(&self, participant_id: &str) -> String {
        format!("{}:status:{}", self.prefix, participant_id)
    }

    pub fn partner(&self, participant_id: &str) -> String {
        format!("{}:partner:{}", self.prefix, participant_id)
    }

    pub fn session(&self, participant_id: &str) -> String {
        format!("{}:session:{}", self.prefix, participant_id)
    }
}

/// Open a managed connection that reconnects on its own
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).map_err(|e| MatchError::ConfigurationError {
        message: format!("Invalid store URL: {}", e),
    })?;

    let connection = ConnectionManager::new(client)
        .await
        .map_err(|e| unavailable("connect", e))?;

    info!("Connected to shared store");
    Ok(connection)
}

pub(crate) fn unavailable(operation: &str, error: redis::RedisError) -> anyhow::Error {
    MatchError::StoreUnavailable {
        message: format!("{} failed: {}", operation, error),
    }
    .into()
}

pub(crate) fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Searching pool and locks shared by every instance pointed at the same Redis
#[derive(Clone)]
pub struct RedisSearchStore {
    connection: ConnectionManager,
    keys: RedisKeys,
}

impl RedisSearchStore {
    pub fn new(connection: ConnectionManager, keys: RedisKeys) -> Self {
        Self { connection, keys }
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }
}

#[async_trait]
impl SearchPool for RedisSearchStore {
    async fn enroll(&self, record: SearchRecord, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(&record).map_err(|e| MatchError::InternalError {
            message: format!("Failed to serialize search record: {}", e),
        })?;

        let mut connection = self.connection.clone();
        let _: i64 = Script::new(ENROLL_SCRIPT)
            .key(self.keys.pool())
            .key(self.keys.record(&record.participant_id))
            .key(self.keys.pool_sequence())
            .arg(&record.participant_id)
            .arg(payload)
            .arg(millis(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(|e| unavailable("enroll", e))?;

        Ok(())
    }

    async fn evict(&self, participant_id: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let (removed, deleted): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(self.keys.pool())
            .arg(participant_id)
            .cmd("DEL")
            .arg(self.keys.record(participant_id))
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("evict", e))?;

        Ok(removed > 0 || deleted > 0)
    }

    async fn members(&self) -> Result<Vec<ParticipantId>> {
        let mut connection = self.connection.clone();
        let members: Vec<ParticipantId> = Script::new(LIVE_MEMBERS_SCRIPT)
            .key(self.keys.pool())
            .arg(self.keys.record_prefix())
            .invoke_async(&mut connection)
            .await
            .map_err(|e| unavailable("members", e))?;

        Ok(members)
    }

    async fn record(&self, participant_id: &str) -> Result<Option<SearchRecord>> {
        let mut connection = self.connection.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.keys.record(participant_id))
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("record", e))?;

        payload
            .map(|payload| {
                serde_json::from_str(&payload).map_err(|e| {
                    MatchError::MalformedPayload {
                        reason: format!("Stored record for {}: {}", participant_id, e),
                    }
                    .into()
                })
            })
            .transpose()
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.members().await?.len())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut connection = self.connection.clone();
        let dropped: usize = Script::new(PURGE_SCRIPT)
            .key(self.keys.pool())
            .arg(self.keys.record_prefix())
            .invoke_async(&mut connection)
            .await
            .map_err(|e| unavailable("purge_expired", e))?;

        if dropped > 0 {
            debug!(dropped, "Dropped pool members with expired records");
        }
        Ok(dropped)
    }
}

#[async_trait]
impl LockManager for RedisSearchStore {
    async fn try_acquire(&self, participant_id: &str, ttl: Duration) -> Result<Option<MatchLock>> {
        let token = utils::generate_lock_token();

        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.lock(participant_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("lock_acquire", e))?;

        Ok(reply.map(|_| MatchLock {
            participant_id: participant_id.to_string(),
            token,
        }))
    }

    async fn release(&self, lock: &MatchLock) -> Result<bool> {
        let mut connection = self.connection.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(self.keys.lock(&lock.participant_id))
            .arg(&lock.token)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| unavailable("lock_release", e))?;

        Ok(deleted > 0)
    }

    async fn is_locked(&self, participant_id: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.keys.lock(participant_id))
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("lock_exists", e))?;

        Ok(exists)
    }

    /// Redis expires lock keys itself
    async fn purge_expired_locks(&self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout_under_prefix() {
        let keys = RedisKeys::new("chat:");
        assert_eq!(keys.prefix(), "chat");
        assert_eq!(keys.pool(), "chat:pool");
        assert_eq!(keys.pool_sequence(), "chat:pool:seq");
        assert_eq!(keys.record("42"), "chat:record:42");
        assert!(keys.record("42").starts_with(&keys.record_prefix()));
        assert_eq!(keys.lock("42"), "chat:lock:42");
        assert_eq!(keys.status("42"), "chat:status:42");
        assert_eq!(keys.partner("42"), "chat:partner:42");
        assert_eq!(keys.session("42"), "chat:session:42");
    }

    #[test]
    fn test_ttl_never_rounds_to_zero() {
        assert_eq!(millis(Duration::from_secs(10)), 10_000);
        assert_eq!(millis(Duration::from_micros(10)), 1);
    }

    #[test]
    fn test_redis_errors_are_store_faults() {
        let err = unavailable(
            "enroll",
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")),
        );
        assert!(crate::error::is_store_fault(&err));
        assert!(err.to_string().contains("enroll"));
    }
}
