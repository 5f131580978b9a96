use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{format_system_time, validation::validate_join_code},
    state::{match_record::MatchRecord, profiles::Profile},
};

/// Open match as listed in the lobby.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OpenMatchSummary {
    /// Match id, also the join code.
    pub match_id: String,
    pub host_id: String,
    /// Host display name, or the host id when no profile is known.
    pub host_name: String,
    pub host_level: Option<u32>,
    pub topic: String,
    pub level: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl OpenMatchSummary {
    /// Listing entry for `record`, enriched with the host's profile when known.
    pub fn new(record: &MatchRecord, host_profile: Option<Profile>) -> Self {
        let (host_name, host_level) = match host_profile {
            Some(profile) => (profile.display_name, Some(profile.level)),
            None => (record.host_id.clone(), None),
        };
        Self {
            match_id: record.match_id.clone(),
            host_id: record.host_id.clone(),
            host_name,
            host_level,
            topic: record.deck.topic.clone(),
            level: record.deck.level.clone(),
            created_at: format_system_time(record.timestamp),
        }
    }
}

/// Open matches listed in the lobby.
#[derive(Debug, Serialize, ToSchema)]
pub struct LobbyResponse {
    /// Newest first.
    pub matches: Vec<OpenMatchSummary>,
}

/// Join request carrying a code typed by the user.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct JoinByCodeRequest {
    #[validate(custom(function = "validate_join_code"))]
    pub code: String,
}
