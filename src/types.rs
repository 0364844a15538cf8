//! Common types used throughout the pairing service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable identifier of a chat participant
pub type ParticipantId = String;

/// Unique identifier of a committed chat session
pub type SessionId = Uuid;

/// Strategy a participant asked to be matched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Random,
    Nearby,
}

impl SearchMode {
    /// Label used for logging and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Random => "random",
            SearchMode::Nearby => "nearby",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's own gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Which partner gender a participant is willing to be paired with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    #[default]
    Any,
    Male,
    Female,
    Other,
}

impl Preference {
    /// The specific gender wanted, or `None` for the wildcard
    pub fn wanted(&self) -> Option<Gender> {
        match self {
            Preference::Any => None,
            Preference::Male => Some(Gender::Male),
            Preference::Female => Some(Gender::Female),
            Preference::Other => Some(Gender::Other),
        }
    }

    /// Whether a partner with the given gender satisfies this preference
    pub fn accepts(&self, gender: Option<Gender>) -> bool {
        match self.wanted() {
            None => true,
            Some(wanted) => gender == Some(wanted),
        }
    }
}

/// A point on the globe in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Build coordinates from raw degrees.
    ///
    /// Returns `None` for out-of-range or non-finite values and for the exact
    /// `(0, 0)` pair, which upstream profile storage uses for "no location".
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        if latitude == 0.0 && longitude == 0.0 {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }

    /// Build coordinates from an optional pair; both halves must be present
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            _ => None,
        }
    }
}

/// Durable status of a participant as recorded by the status store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    #[default]
    Idle,
    Searching,
    Chatting,
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Idle => "idle",
            ParticipantStatus::Searching => "searching",
            ParticipantStatus::Chatting => "chatting",
        }
    }
}

impl std::str::FromStr for ParticipantStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ParticipantStatus::Idle),
            "searching" => Ok(ParticipantStatus::Searching),
            "chatting" => Ok(ParticipantStatus::Chatting),
            other => Err(format!("unknown participant status: {}", other)),
        }
    }
}

/// One actively searching participant.
///
/// This is both the per-participant entry in the shared store and the flat
/// payload broadcast on the search channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub participant_id: ParticipantId,
    pub mode: SearchMode,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub preference: Preference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub inserted_at: DateTime<Utc>,
}

impl SearchRecord {
    /// Location of the participant, if they shared a usable one
    pub fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.latitude, self.longitude)
    }
}

/// Parameters of a search submission
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub participant_id: ParticipantId,
    pub mode: SearchMode,
    pub gender: Option<Gender>,
    pub preference: Preference,
    pub coordinates: Option<Coordinates>,
}

impl SearchRequest {
    /// Turn the request into a freshly stamped record
    pub fn into_record(self, inserted_at: DateTime<Utc>) -> SearchRecord {
        SearchRecord {
            participant_id: self.participant_id,
            mode: self.mode,
            gender: self.gender,
            preference: self.preference,
            latitude: self.coordinates.map(|c| c.latitude),
            longitude: self.coordinates.map(|c| c.longitude),
            inserted_at,
        }
    }
}

/// Event delivered to a participant when a partner has been found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchNotification {
    pub participant_id: ParticipantId,
    pub partner_id: ParticipantId,
    pub session_id: SessionId,
    pub mode: SearchMode,
    pub distance_km: Option<f64>,
    pub matched_at: DateTime<Utc>,
}

/// Event delivered to the participant left behind when their partner ends the chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerLeftNotification {
    pub participant_id: ParticipantId,
    pub session_id: SessionId,
    pub ended_at: DateTime<Utc>,
}

/// Inbound commands from the bot-command layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchCommand {
    Submit {
        participant_id: ParticipantId,
        mode: SearchMode,
        #[serde(default)]
        gender: Option<Gender>,
        #[serde(default)]
        preference: Preference,
        #[serde(default)]
        latitude: Option<f64>,
        #[serde(default)]
        longitude: Option<f64>,
    },
    Withdraw {
        participant_id: ParticipantId,
    },
    /// Leave the current chat, or cancel the search if still searching
    End {
        participant_id: ParticipantId,
    },
    /// Leave the current chat and immediately search again
    Next {
        participant_id: ParticipantId,
        mode: SearchMode,
        #[serde(default)]
        gender: Option<Gender>,
        #[serde(default)]
        preference: Preference,
        #[serde(default)]
        latitude: Option<f64>,
        #[serde(default)]
        longitude: Option<f64>,
    },
}

impl SearchCommand {
    /// Participant the command refers to
    pub fn participant_id(&self) -> &str {
        match self {
            SearchCommand::Submit { participant_id, .. } => participant_id,
            SearchCommand::Withdraw { participant_id } => participant_id,
            SearchCommand::End { participant_id } => participant_id,
            SearchCommand::Next { participant_id, .. } => participant_id,
        }
    }
}
