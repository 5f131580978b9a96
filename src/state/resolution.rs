//! Convergent resolution of a question.
//!
//! Both controllers run [`resolve`] against the latest snapshot. Because the
//! result depends only on the snapshot, whichever controller writes first
//! produces exactly what the other one would have written.

use serde_json::{Value, json};

use crate::{
    dao::models::FieldMap,
    state::{
        match_record::{
            ANSWER_WINDOW_SECS, AnswerLetter, MatchRecord, MatchState, Side, Winner, fields,
        },
        state_machine::{MatchEvent, next_state},
    },
};

/// What happens to the match once a question is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Move on to the next question.
    Advance,
    /// Stop the match with the given result.
    Finish(Winner),
}

/// Authoritative write closing one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Question this resolution closes.
    pub question_index: u32,
    pub host_lives: u8,
    pub joiner_lives: u8,
    pub outcome: Outcome,
}

/// Resolve the current question of `record` if it is ready to be resolved.
///
/// A question is ready once both sides answered, or once the local countdown
/// expired. Each wrong or missing answer costs its side one life.
pub fn resolve(
    record: &MatchRecord,
    correct: AnswerLetter,
    timer_expired: bool,
) -> Option<Resolution> {
    if record.state != MatchState::InProgress {
        return None;
    }
    let both_answered = record.host_answer.is_some() && record.joiner_answer.is_some();
    if !both_answered && !timer_expired {
        return None;
    }

    let remaining = |side: Side| {
        let lost = u8::from(record.answer(side) != Some(correct));
        record.lives(side).saturating_sub(lost)
    };
    let host_lives = remaining(Side::Host);
    let joiner_lives = remaining(Side::Joiner);

    let outcome = match (host_lives, joiner_lives) {
        (0, 0) => Outcome::Finish(Winner::Draw),
        (0, _) => Outcome::Finish(Winner::Player(record.joiner_id.clone()?)),
        (_, 0) => Outcome::Finish(Winner::Player(record.host_id.clone())),
        _ => Outcome::Advance,
    };

    Some(Resolution {
        question_index: record.current_question_index,
        host_lives,
        joiner_lives,
        outcome,
    })
}

impl Resolution {
    fn event(&self) -> MatchEvent {
        match self.outcome {
            Outcome::Advance => MatchEvent::QuestionAdvanced,
            Outcome::Finish(_) => MatchEvent::Finished,
        }
    }

    /// Fields that must still hold for the write to apply.
    pub fn preconditions(&self) -> FieldMap {
        FieldMap::from_iter([
            (fields::STATE.to_string(), MatchState::InProgress.as_value()),
            (
                fields::CURRENT_QUESTION_INDEX.to_string(),
                json!(self.question_index),
            ),
        ])
    }

    /// Single batched write: lives, cleared answers and either the next
    /// question or the terminal state.
    pub fn fields(&self) -> FieldMap {
        let mut update = FieldMap::from_iter([
            (fields::HOST_LIVES.to_string(), json!(self.host_lives)),
            (fields::JOINER_LIVES.to_string(), json!(self.joiner_lives)),
            (fields::HOST_ANSWER.to_string(), Value::Null),
            (fields::JOINER_ANSWER.to_string(), Value::Null),
        ]);
        match &self.outcome {
            Outcome::Advance => {
                update.insert(
                    fields::CURRENT_QUESTION_INDEX.to_string(),
                    json!(self.question_index + 1),
                );
                update.insert(fields::TIME_LEFT.to_string(), json!(ANSWER_WINDOW_SECS));
            }
            Outcome::Finish(winner) => {
                update.insert(fields::STATE.to_string(), MatchState::Finished.as_value());
                update.insert(
                    fields::WINNER.to_string(),
                    Value::String(winner.clone().into()),
                );
            }
        }
        update
    }

    /// Whether `record` already shows this question as resolved, by anyone.
    pub fn is_reflected_in(&self, record: &MatchRecord) -> bool {
        record.state == MatchState::Finished || record.current_question_index > self.question_index
    }

    /// Record expected after this resolution is written onto `record`.
    pub fn apply_to(&self, record: &MatchRecord) -> MatchRecord {
        let mut next = record.clone();
        next.host_lives = self.host_lives;
        next.joiner_lives = self.joiner_lives;
        next.host_answer = None;
        next.joiner_answer = None;
        if let Ok(state) = next_state(record.state, self.event()) {
            next.state = state;
        }
        match &self.outcome {
            Outcome::Advance => {
                next.current_question_index = self.question_index + 1;
                next.time_left = ANSWER_WINDOW_SECS;
            }
            Outcome::Finish(winner) => next.winner = Some(winner.clone()),
        }
        next
    }
}
