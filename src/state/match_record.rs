//! Shared match document and its validated in-memory form.
//!
//! Every snapshot pulled from the store goes through [`MatchRecord::from_document`];
//! a snapshot that fails to decode or breaks an invariant is rejected with a
//! [`RecordError`] instead of being patched up with defaults.

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{TimestampMilliSeconds, serde_as};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{dao::models::Document, state::questions::QuestionDeck};

/// Lives each side starts a match with.
pub const MAX_LIVES: u8 = 3;
/// Seconds available to answer one question.
pub const ANSWER_WINDOW_SECS: u8 = 20;
/// Value stored in `winner` when both sides ran out of lives together.
pub const DRAW: &str = "draw";

/// Field names of the shared document.
pub mod fields {
    pub const MATCH_ID: &str = "match_id";
    pub const HOST_ID: &str = "host_id";
    pub const JOINER_ID: &str = "joiner_id";
    pub const STATE: &str = "state";
    pub const CURRENT_QUESTION_INDEX: &str = "current_question_index";
    pub const HOST_LIVES: &str = "host_lives";
    pub const JOINER_LIVES: &str = "joiner_lives";
    pub const HOST_ANSWER: &str = "host_answer";
    pub const JOINER_ANSWER: &str = "joiner_answer";
    pub const TIME_LEFT: &str = "time_left";
    pub const WINNER: &str = "winner";
}

/// Lifecycle of a match. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    /// Created by the host, waiting for an opponent.
    Waiting,
    /// Both players present; questions are being played.
    InProgress,
    /// A winner (or a draw) has been recorded. The record is inert.
    Finished,
}

impl MatchState {
    /// Value of the state as stored in the document.
    pub fn as_value(self) -> Value {
        Value::String(
            match self {
                MatchState::Waiting => "waiting",
                MatchState::InProgress => "in_progress",
                MatchState::Finished => "finished",
            }
            .to_string(),
        )
    }
}

/// Which seat of the match a player occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Host,
    Joiner,
}

impl Side {
    /// The other seat of the match.
    pub fn opponent(self) -> Side {
        match self {
            Side::Host => Side::Joiner,
            Side::Joiner => Side::Host,
        }
    }

    /// Record field holding this side's answer.
    pub fn answer_field(self) -> &'static str {
        match self {
            Side::Host => fields::HOST_ANSWER,
            Side::Joiner => fields::JOINER_ANSWER,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Host => "host",
            Side::Joiner => "joiner",
        })
    }
}

/// Terminal result of a match, stored as the winner's id or [`DRAW`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Winner {
    Player(String),
    Draw,
}

impl From<String> for Winner {
    fn from(value: String) -> Self {
        if value == DRAW {
            Winner::Draw
        } else {
            Winner::Player(value)
        }
    }
}

impl From<Winner> for String {
    fn from(value: Winner) -> Self {
        match value {
            Winner::Player(id) => id,
            Winner::Draw => DRAW.to_string(),
        }
    }
}

/// Answer option letter (`a` for the first option, `b` for the second, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AnswerLetter(char);

/// Rejected answer letter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("answer must be a single letter between `a` and `z`, got `{0}`")]
pub struct InvalidLetter(pub String);

impl AnswerLetter {
    /// Letter designating the option at `index`, if one exists.
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index)
            .ok()
            .filter(|offset| *offset < 26)
            .map(|offset| AnswerLetter(char::from(b'a' + offset)))
    }

    /// Zero-based option index this letter designates.
    pub fn index(self) -> usize {
        (self.0 as u8 - b'a') as usize
    }
}

impl std::str::FromStr for AnswerLetter {
    type Err = InvalidLetter;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let mut chars = normalized.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) if letter.is_ascii_lowercase() => Ok(AnswerLetter(letter)),
            _ => Err(InvalidLetter(raw.to_string())),
        }
    }
}

impl TryFrom<String> for AnswerLetter {
    type Error = InvalidLetter;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AnswerLetter> for String {
    fn from(value: AnswerLetter) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for AnswerLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current time truncated to the millisecond precision the document stores.
fn now_millis() -> SystemTime {
    let now = SystemTime::now();
    match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => UNIX_EPOCH + Duration::from_millis(elapsed.as_millis() as u64),
        Err(_) => now,
    }
}

/// Snapshot that could not be accepted as a match record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("match document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("match document violates an invariant: {0}")]
    Invariant(&'static str),
}

/// Full state of one match as shared between both players.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Store-generated id; doubles as the join code.
    pub match_id: String,
    pub host_id: String,
    #[serde(default)]
    pub joiner_id: Option<String>,
    pub state: MatchState,
    pub current_question_index: u32,
    pub host_lives: u8,
    pub joiner_lives: u8,
    #[serde(default)]
    pub host_answer: Option<AnswerLetter>,
    #[serde(default)]
    pub joiner_answer: Option<AnswerLetter>,
    /// Advisory countdown for the current question, in seconds.
    pub time_left: u8,
    #[serde(default)]
    pub winner: Option<Winner>,
    /// Creation time, used to sort the lobby.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: SystemTime,
    pub deck: QuestionDeck,
}

impl MatchRecord {
    /// Fresh record as written by the host when opening a match.
    pub fn waiting(match_id: String, host_id: String, deck: QuestionDeck) -> Self {
        Self {
            match_id,
            host_id,
            joiner_id: None,
            state: MatchState::Waiting,
            current_question_index: 0,
            host_lives: MAX_LIVES,
            joiner_lives: MAX_LIVES,
            host_answer: None,
            joiner_answer: None,
            time_left: ANSWER_WINDOW_SECS,
            winner: None,
            timestamp: now_millis(),
            deck,
        }
    }

    /// Decode and validate a raw snapshot.
    pub fn from_document(document: Document) -> Result<Self, RecordError> {
        let record: MatchRecord = serde_json::from_value(Value::Object(document))?;
        record.validate()?;
        Ok(record)
    }

    /// Encode the record as a full document (absent options become `null`).
    pub fn to_document(&self) -> Result<Document, RecordError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(RecordError::Invariant("record did not encode to an object")),
        }
    }

    /// Check the invariants every accepted snapshot must satisfy.
    pub fn validate(&self) -> Result<(), RecordError> {
        let invariant = |holds: bool, message| {
            if holds {
                Ok(())
            } else {
                Err(RecordError::Invariant(message))
            }
        };

        invariant(!self.match_id.is_empty(), "empty match id")?;
        invariant(!self.host_id.is_empty(), "empty host id")?;
        invariant(
            self.host_lives <= MAX_LIVES && self.joiner_lives <= MAX_LIVES,
            "lives above maximum",
        )?;
        invariant(self.time_left <= ANSWER_WINDOW_SECS, "time left above answer window")?;
        invariant(!self.deck.order.is_empty(), "empty question deck")?;

        match self.state {
            MatchState::Waiting => {
                invariant(self.joiner_id.is_none(), "waiting match has a joiner")?;
                invariant(
                    self.host_answer.is_none() && self.joiner_answer.is_none(),
                    "waiting match has answers",
                )?;
                invariant(self.winner.is_none(), "waiting match has a winner")?;
            }
            MatchState::InProgress => {
                invariant(self.joiner_id.is_some(), "match in progress without joiner")?;
                invariant(self.winner.is_none(), "match in progress has a winner")?;
            }
            MatchState::Finished => {
                invariant(self.joiner_id.is_some(), "finished match without joiner")?;
                match &self.winner {
                    None => return Err(RecordError::Invariant("finished match without winner")),
                    Some(Winner::Draw) => invariant(
                        self.host_lives == 0 && self.joiner_lives == 0,
                        "draw recorded while a side has lives",
                    )?,
                    Some(Winner::Player(id)) => {
                        invariant(self.side_of(id).is_some(), "winner is not a participant")?;
                        invariant(
                            self.host_lives == 0 || self.joiner_lives == 0,
                            "winner recorded while both sides have lives",
                        )?;
                    }
                }
            }
        }

        invariant(
            self.joiner_id.as_deref() != Some(self.host_id.as_str()),
            "host joined own match",
        )
    }

    /// Seat held by `player_id`, if they take part in this match.
    pub fn side_of(&self, player_id: &str) -> Option<Side> {
        if self.host_id == player_id {
            Some(Side::Host)
        } else if self.joiner_id.as_deref() == Some(player_id) {
            Some(Side::Joiner)
        } else {
            None
        }
    }

    /// Lives left to `side`.
    pub fn lives(&self, side: Side) -> u8 {
        match side {
            Side::Host => self.host_lives,
            Side::Joiner => self.joiner_lives,
        }
    }

    /// Answer `side` gave to the current question, if any.
    pub fn answer(&self, side: Side) -> Option<AnswerLetter> {
        match side {
            Side::Host => self.host_answer,
            Side::Joiner => self.joiner_answer,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn deck() -> QuestionDeck {
        QuestionDeck {
            topic: "capitals".into(),
            level: "a1".into(),
            order: vec!["q1".into(), "q2".into()],
        }
    }

    pub(crate) fn in_progress() -> MatchRecord {
        let mut record = MatchRecord::waiting("m1".into(), "alice".into(), deck());
        record.joiner_id = Some("bob".into());
        record.state = MatchState::InProgress;
        record
    }

    #[test]
    fn document_round_trip_keeps_absent_fields_null() {
        let record = MatchRecord::waiting("m1".into(), "alice".into(), deck());
        let document = record.to_document().unwrap();
        assert_eq!(document[fields::JOINER_ID], Value::Null);
        assert_eq!(document[fields::STATE], json!("waiting"));
        assert_eq!(MatchRecord::from_document(document).unwrap(), record);
    }

    #[test]
    fn missing_optional_fields_decode_as_absent() {
        let mut document = MatchRecord::waiting("m1".into(), "alice".into(), deck())
            .to_document()
            .unwrap();
        document.remove(fields::JOINER_ID);
        document.remove(fields::WINNER);
        let record = MatchRecord::from_document(document).unwrap();
        assert!(record.joiner_id.is_none());
    }

    #[test]
    fn draw_marker_round_trips() {
        let mut record = in_progress();
        record.state = MatchState::Finished;
        record.host_lives = 0;
        record.joiner_lives = 0;
        record.winner = Some(Winner::Draw);
        let document = record.to_document().unwrap();
        assert_eq!(document[fields::WINNER], json!(DRAW));
        assert_eq!(
            MatchRecord::from_document(document).unwrap().winner,
            Some(Winner::Draw)
        );
    }

    #[test]
    fn invariant_violations_are_rejected() {
        let mut waiting_with_joiner = MatchRecord::waiting("m1".into(), "alice".into(), deck());
        waiting_with_joiner.joiner_id = Some("bob".into());
        assert!(matches!(
            waiting_with_joiner.validate(),
            Err(RecordError::Invariant(_))
        ));

        let mut finished_without_winner = in_progress();
        finished_without_winner.state = MatchState::Finished;
        assert!(finished_without_winner.validate().is_err());

        let mut stranger_wins = in_progress();
        stranger_wins.state = MatchState::Finished;
        stranger_wins.joiner_lives = 0;
        stranger_wins.winner = Some(Winner::Player("mallory".into()));
        assert!(stranger_wins.validate().is_err());

        let mut early_draw = in_progress();
        early_draw.state = MatchState::Finished;
        early_draw.joiner_lives = 0;
        early_draw.winner = Some(Winner::Draw);
        assert!(early_draw.validate().is_err());
        early_draw.host_lives = 0;
        assert!(early_draw.validate().is_ok());

        let mut too_many_lives = in_progress();
        too_many_lives.host_lives = MAX_LIVES + 1;
        assert!(too_many_lives.validate().is_err());
    }

    #[test]
    fn malformed_documents_are_quarantined() {
        let mut document = in_progress().to_document().unwrap();
        document.insert(fields::STATE.into(), json!("paused"));
        assert!(matches!(
            MatchRecord::from_document(document),
            Err(RecordError::Malformed(_))
        ));

        let mut document = in_progress().to_document().unwrap();
        document.insert(fields::HOST_ANSWER.into(), json!("ab"));
        assert!(MatchRecord::from_document(document).is_err());
    }

    #[test]
    fn answer_letters_parse_case_insensitively() {
        let letter: AnswerLetter = " C ".parse().unwrap();
        assert_eq!(letter.index(), 2);
        assert_eq!(AnswerLetter::from_index(2), Some(letter));
        assert!("".parse::<AnswerLetter>().is_err());
        assert!("1".parse::<AnswerLetter>().is_err());
    }

    #[test]
    fn sides_resolve_participants() {
        let record = in_progress();
        assert_eq!(record.side_of("alice"), Some(Side::Host));
        assert_eq!(record.side_of("bob"), Some(Side::Joiner));
        assert_eq!(record.side_of("carol"), None);
        assert_eq!(Side::Host.opponent(), Side::Joiner);
    }
}
