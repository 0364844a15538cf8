//! AMQP message definitions and validation

use crate::error::{MatchError, Result};
use crate::types::{
    Coordinates, MatchNotification, PartnerLeftNotification, SearchCommand, SearchRequest,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Durable queue carrying search commands from the chat layer
pub const SEARCH_COMMAND_QUEUE: &str = "matchmaking.search_commands";
/// Direct exchange the search intents are broadcast on
pub const SEARCH_EXCHANGE: &str = "matchmaking.search";
/// Topic exchange for outbound pairing events
pub const MATCH_EVENTS_EXCHANGE: &str = "matchmaking.match_events";

pub const PARTICIPANT_MATCHED_ROUTING_KEY: &str = "participant.matched";
pub const PARTNER_LEFT_ROUTING_KEY: &str = "participant.partner_left";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(payload: T, routing_key: &str) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchError::InternalError {
                message: format!("Failed to serialize envelope: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchError::MalformedPayload {
                reason: format!("Failed to deserialize envelope: {}", e),
            }
            .into()
        })
    }
}

/// Envelope published for every pairing notification
pub type MatchEventEnvelope = MessageEnvelope<MatchNotification>;

/// Envelope published when a session is ended by one side
pub type PartnerLeftEnvelope = MessageEnvelope<PartnerLeftNotification>;

/// Command decoding and validation
pub struct MessageUtils;

impl MessageUtils {
    /// Decode and validate a search command
    pub fn deserialize_search_command(bytes: &[u8]) -> Result<SearchCommand> {
        let command: SearchCommand =
            serde_json::from_slice(bytes).map_err(|e| MatchError::MalformedPayload {
                reason: format!("Failed to deserialize search command: {}", e),
            })?;

        Self::validate_search_command(&command)?;
        Ok(command)
    }

    pub fn validate_search_command(command: &SearchCommand) -> Result<()> {
        if command.participant_id().trim().is_empty() {
            return Err(MatchError::InvalidSearchRequest {
                reason: "Participant ID cannot be empty".to_string(),
            }
            .into());
        }

        match command {
            SearchCommand::Submit {
                latitude, longitude, ..
            }
            | SearchCommand::Next {
                latitude, longitude, ..
            } => Self::validate_location(*latitude, *longitude)?,
            SearchCommand::Withdraw { .. } | SearchCommand::End { .. } => {}
        }

        Ok(())
    }

    /// Only a complete, in-range pair counts as a location. A missing pair or
    /// the `(0, 0)` placeholder means the participant shared none.
    fn validate_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<()> {
        match (latitude, longitude) {
            (None, None) => Ok(()),
            (Some(lat), Some(lon)) if lat == 0.0 && lon == 0.0 => Ok(()),
            (Some(lat), Some(lon)) if Coordinates::new(lat, lon).is_some() => Ok(()),
            (Some(lat), Some(lon)) => Err(MatchError::InvalidSearchRequest {
                reason: format!("Coordinates out of range: ({}, {})", lat, lon),
            }
            .into()),
            _ => Err(MatchError::InvalidSearchRequest {
                reason: "Latitude and longitude must be given together".to_string(),
            }
            .into()),
        }
    }

    /// Search request carried by a `Submit` or `Next` command
    pub fn search_request(command: SearchCommand) -> Option<SearchRequest> {
        match command {
            SearchCommand::Submit {
                participant_id,
                mode,
                gender,
                preference,
                latitude,
                longitude,
            }
            | SearchCommand::Next {
                participant_id,
                mode,
                gender,
                preference,
                latitude,
                longitude,
            } => Some(SearchRequest {
                participant_id,
                mode,
                gender,
                preference,
                coordinates: Coordinates::from_parts(latitude, longitude),
            }),
            SearchCommand::Withdraw { .. } | SearchCommand::End { .. } => None,
        }
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Gender, Preference, SearchMode};

    #[test]
    fn test_submit_command_decodes_into_request() {
        let json = br#"{"type":"Submit","participant_id":"42","mode":"nearby","gender":"female","preference":"male","latitude":1.0,"longitude":1.0}"#;
        let command = MessageUtils::deserialize_search_command(json).unwrap();
        let request = MessageUtils::search_request(command).unwrap();

        assert_eq!(request.participant_id, "42");
        assert_eq!(request.mode, SearchMode::Nearby);
        assert_eq!(request.gender, Some(Gender::Female));
        assert_eq!(request.preference, Preference::Male);
        assert_eq!(request.coordinates, Coordinates::new(1.0, 1.0));
    }

    #[test]
    fn test_zero_coordinates_mean_no_location() {
        let json = br#"{"type":"Submit","participant_id":"42","mode":"nearby","latitude":0.0,"longitude":0.0}"#;
        let command = MessageUtils::deserialize_search_command(json).unwrap();
        let request = MessageUtils::search_request(command).unwrap();

        assert_eq!(request.coordinates, None);
        assert_eq!(request.preference, Preference::Any);
    }

    #[test]
    fn test_invalid_commands_rejected() {
        let out_of_range = br#"{"type":"Submit","participant_id":"1","mode":"nearby","latitude":91.0,"longitude":1.0}"#;
        assert!(MessageUtils::deserialize_search_command(out_of_range).is_err());

        let half_location =
            br#"{"type":"Submit","participant_id":"1","mode":"nearby","latitude":10.0}"#;
        assert!(MessageUtils::deserialize_search_command(half_location).is_err());

        let empty_id = br#"{"type":"Withdraw","participant_id":" "}"#;
        assert!(MessageUtils::deserialize_search_command(empty_id).is_err());

        let unknown_mode = br#"{"type":"Submit","participant_id":"1","mode":"global"}"#;
        let err = MessageUtils::deserialize_search_command(unknown_mode).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchError>(),
            Some(MatchError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_withdraw_carries_no_request() {
        let command = MessageUtils::deserialize_search_command(
            br#"{"type":"Withdraw","participant_id":"7"}"#,
        )
        .unwrap();
        assert_eq!(command.participant_id(), "7");
        assert!(MessageUtils::search_request(command).is_none());
    }

    #[test]
    fn test_next_carries_a_validated_request() {
        let json = br#"{"type":"Next","participant_id":"5","mode":"random","gender":"male"}"#;
        let request =
            MessageUtils::search_request(MessageUtils::deserialize_search_command(json).unwrap())
                .unwrap();
        assert_eq!(request.participant_id, "5");
        assert_eq!(request.mode, SearchMode::Random);

        let bad = br#"{"type":"Next","participant_id":"5","mode":"nearby","longitude":3.0}"#;
        assert!(MessageUtils::deserialize_search_command(bad).is_err());

        let end = MessageUtils::deserialize_search_command(br#"{"type":"End","participant_id":"5"}"#)
            .unwrap();
        assert!(MessageUtils::search_request(end).is_none());
    }

    #[test]
    fn test_envelope_keeps_routing_key() {
        let notification = MatchNotification {
            participant_id: "a".to_string(),
            partner_id: "b".to_string(),
            session_id: uuid::Uuid::new_v4(),
            mode: SearchMode::Random,
            distance_km: None,
            matched_at: chrono::Utc::now(),
        };
        let envelope = MessageEnvelope::new(notification.clone(), PARTICIPANT_MATCHED_ROUTING_KEY);
        let decoded = MatchEventEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.routing_key, PARTICIPANT_MATCHED_ROUTING_KEY);
        assert_eq!(decoded.payload, notification);
        assert!(!decoded.correlation_id.is_empty());

        let left = PartnerLeftNotification {
            participant_id: "b".to_string(),
            session_id: notification.session_id,
            ended_at: chrono::Utc::now(),
        };
        let envelope = MessageEnvelope::new(left.clone(), PARTNER_LEFT_ROUTING_KEY);
        let decoded = PartnerLeftEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.routing_key, "participant.partner_left");
        assert_eq!(decoded.payload, left);
    }
}
