use serde::Serialize;
use utoipa::ToSchema;

use crate::state::match_record::{MatchState, Side};

/// State of the watch subscription behind a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// First subscription not established yet.
    Connecting,
    Connected,
    /// Subscription dropped; the controller is re-subscribing.
    Reconnecting,
}

/// Result of a finished match from the viewer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Won,
    Lost,
    Draw,
}

/// Everything a player's UI needs to render a match, pushed on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MatchViewState {
    pub match_id: String,
    pub my_side: Side,
    /// `None` until the first snapshot has been received.
    pub state: Option<MatchState>,
    pub question_index: u32,
    /// Prompt of the current question while the match is in progress.
    pub question: Option<String>,
    /// Options of the current question, option `a` first.
    pub options: Vec<String>,
    pub host_lives: u8,
    pub joiner_lives: u8,
    /// Local countdown for the current question, in seconds.
    pub time_left: u8,
    /// Letter this player submitted for the current question.
    pub my_answer: Option<String>,
    pub opponent_answered: bool,
    /// Winner id, or `draw`.
    pub winner: Option<String>,
    pub outcome: Option<MatchOutcome>,
    pub connection: ConnectionStatus,
    /// Last terminal failure, cleared by the next successful write.
    pub error: Option<String>,
}

impl MatchViewState {
    /// Placeholder published before the first snapshot arrives.
    pub fn connecting(match_id: impl Into<String>, my_side: Side) -> Self {
        Self {
            match_id: match_id.into(),
            my_side,
            state: None,
            question_index: 0,
            question: None,
            options: Vec::new(),
            host_lives: 0,
            joiner_lives: 0,
            time_left: 0,
            my_answer: None,
            opponent_answered: false,
            winner: None,
            outcome: None,
            connection: ConnectionStatus::Connecting,
            error: None,
        }
    }
}
