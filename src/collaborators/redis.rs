//! Redis-backed participant statuses and sessions
//!
//! Uses the same key prefix as the searching pool. Pairing and ending a
//! session are Lua scripts so both sides change together.

use super::{EndedSession, SessionStore, StatusStore};
use crate::error::{MatchError, Result};
use crate::store::redis::unavailable;
use crate::store::RedisKeys;
use crate::types::{ParticipantId, ParticipantStatus, SessionId};
use crate::utils;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

/// Returns 0 on success, otherwise the 1-based position of the side that was not searching
const CREATE_PAIRING_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= 'searching' then return 1 end
if redis.call('GET', KEYS[2]) ~= 'searching' then return 2 end
redis.call('SET', KEYS[1], 'chatting')
redis.call('SET', KEYS[2], 'chatting')
redis.call('SET', KEYS[3], ARGV[2])
redis.call('SET', KEYS[4], ARGV[1])
redis.call('SET', KEYS[5], ARGV[3])
redis.call('SET', KEYS[6], ARGV[3])
return 0
"#;

const END_SESSION_SCRIPT: &str = r#"
local partner = redis.call('GET', KEYS[1])
if not partner then return false end
local session = redis.call('GET', KEYS[3]) or ''
redis.call('DEL', KEYS[1], KEYS[3], ARGV[1] .. ':partner:' .. partner, ARGV[1] .. ':session:' .. partner)
redis.call('SET', KEYS[2], 'idle')
redis.call('SET', ARGV[1] .. ':status:' .. partner, 'idle')
return {partner, session}
"#;

#[derive(Clone)]
pub struct RedisParticipantStore {
    connection: ConnectionManager,
    keys: RedisKeys,
}

impl RedisParticipantStore {
    pub fn new(connection: ConnectionManager, keys: RedisKeys) -> Self {
        Self { connection, keys }
    }
}

#[async_trait]
impl StatusStore for RedisParticipantStore {
    async fn get_status(&self, participant_id: &str) -> Result<ParticipantStatus> {
        let mut connection = self.connection.clone();
        let status: Option<String> = redis::cmd("GET")
            .arg(self.keys.status(participant_id))
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("get_status", e))?;

        match status {
            None => Ok(ParticipantStatus::Idle),
            Some(text) => text.parse().map_err(|reason| {
                MatchError::InternalError {
                    message: format!("Stored status for {}: {}", participant_id, reason),
                }
                .into()
            }),
        }
    }

    async fn set_status(&self, participant_id: &str, status: ParticipantStatus) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.keys.status(participant_id))
            .arg(status.as_str())
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("set_status", e))?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisParticipantStore {
    async fn create_pairing(&self, a: &str, b: &str) -> Result<SessionId> {
        if a == b {
            return Err(MatchError::SessionCommitFailed {
                reason: format!("participant {} cannot be paired with themselves", a),
            }
            .into());
        }

        let session_id = utils::generate_session_id();
        let mut connection = self.connection.clone();
        let refused: i64 = Script::new(CREATE_PAIRING_SCRIPT)
            .key(self.keys.status(a))
            .key(self.keys.status(b))
            .key(self.keys.partner(a))
            .key(self.keys.partner(b))
            .key(self.keys.session(a))
            .key(self.keys.session(b))
            .arg(a)
            .arg(b)
            .arg(session_id.to_string())
            .invoke_async(&mut connection)
            .await
            .map_err(|e| unavailable("create_pairing", e))?;

        let not_searching = match refused {
            0 => return Ok(session_id),
            1 => a,
            _ => b,
        };
        Err(MatchError::ParticipantNotSearching {
            participant_id: not_searching.to_string(),
        }
        .into())
    }

    async fn partner_of(&self, participant_id: &str) -> Result<Option<ParticipantId>> {
        let mut connection = self.connection.clone();
        let partner: Option<ParticipantId> = redis::cmd("GET")
            .arg(self.keys.partner(participant_id))
            .query_async(&mut connection)
            .await
            .map_err(|e| unavailable("partner_of", e))?;

        Ok(partner)
    }

    async fn end_session(&self, participant_id: &str) -> Result<Option<EndedSession>> {
        let mut connection = self.connection.clone();
        let ended: Option<(ParticipantId, String)> = Script::new(END_SESSION_SCRIPT)
            .key(self.keys.partner(participant_id))
            .key(self.keys.status(participant_id))
            .key(self.keys.session(participant_id))
            .arg(self.keys.prefix())
            .invoke_async(&mut connection)
            .await
            .map_err(|e| unavailable("end_session", e))?;

        let Some((partner_id, session)) = ended else {
            return Ok(None);
        };

        let session_id: SessionId = session.parse().map_err(|e| MatchError::InternalError {
            message: format!("Stored session id for {}: {}", participant_id, e),
        })?;
        debug!(participant_id, partner_id = %partner_id, "Cleared session links");

        Ok(Some(EndedSession {
            session_id,
            partner_id,
        }))
    }
}
