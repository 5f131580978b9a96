use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{format_system_time, validation::validate_answer_letter},
    state::match_record::{MatchRecord, MatchState, Side},
};

/// Options for opening a match; both default to the first configured set.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CreateMatchRequest {
    #[validate(length(min = 1, max = 64))]
    pub topic: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub level: Option<String>,
}

/// Body of `POST /matches/{id}/answer`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitAnswerRequest {
    /// Option letter, `a` for the first option.
    #[validate(custom(function = "validate_answer_letter"))]
    pub letter: String,
}

/// Summary of a match returned by create and join.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchSummary {
    pub match_id: String,
    /// Code to share with the opponent (same as the match id).
    pub join_code: String,
    pub host_id: String,
    pub joiner_id: Option<String>,
    pub state: MatchState,
    pub my_side: Side,
    pub topic: String,
    pub level: String,
    pub created_at: String,
}

impl MatchSummary {
    pub fn new(record: &MatchRecord, my_side: Side) -> Self {
        Self {
            match_id: record.match_id.clone(),
            join_code: record.match_id.clone(),
            host_id: record.host_id.clone(),
            joiner_id: record.joiner_id.clone(),
            state: record.state,
            my_side,
            topic: record.deck.topic.clone(),
            level: record.deck.level.clone(),
            created_at: format_system_time(record.timestamp),
        }
    }
}
