use thiserror::Error;

use crate::state::match_record::MatchState;

/// Events that move a match through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
    /// An opponent took the free seat.
    Joined,
    /// Both answers (or the timer) resolved a question and play continues.
    QuestionAdvanced,
    /// A side ran out of lives.
    Finished,
}

/// Error returned when an event cannot be applied from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// State the match was in when the event was received.
    pub from: MatchState,
    /// The rejected event.
    pub event: MatchEvent,
}

/// Compute the state reached by applying `event` from `from`.
pub fn next_state(from: MatchState, event: MatchEvent) -> Result<MatchState, InvalidTransition> {
    let next = match (from, event) {
        (MatchState::Waiting, MatchEvent::Joined) => MatchState::InProgress,
        (MatchState::InProgress, MatchEvent::QuestionAdvanced) => MatchState::InProgress,
        (MatchState::InProgress, MatchEvent::Finished) => MatchState::Finished,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

fn rank(state: MatchState) -> u8 {
    match state {
        MatchState::Waiting => 0,
        MatchState::InProgress => 1,
        MatchState::Finished => 2,
    }
}

/// Whether moving from `from` to `to` respects the forward-only lifecycle.
///
/// Staying in the same state counts as forward; snapshots of the same state
/// arrive on every write.
pub fn is_forward(from: MatchState, to: MatchState) -> bool {
    rank(to) >= rank(from)
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    const EVENTS: [MatchEvent; 3] = [
        MatchEvent::Joined,
        MatchEvent::QuestionAdvanced,
        MatchEvent::Finished,
    ];

    #[test]
    fn happy_path_through_a_match() {
        let state = next_state(MatchState::Waiting, MatchEvent::Joined).unwrap();
        assert_eq!(state, MatchState::InProgress);
        let state = next_state(state, MatchEvent::QuestionAdvanced).unwrap();
        assert_eq!(state, MatchState::InProgress);
        let state = next_state(state, MatchEvent::Finished).unwrap();
        assert_eq!(state, MatchState::Finished);
    }

    #[test]
    fn finished_is_terminal() {
        for event in EVENTS {
            assert_eq!(
                next_state(MatchState::Finished, event),
                Err(InvalidTransition {
                    from: MatchState::Finished,
                    event
                })
            );
        }
    }

    #[test]
    fn cannot_skip_the_join() {
        assert!(next_state(MatchState::Waiting, MatchEvent::Finished).is_err());
        assert!(next_state(MatchState::Waiting, MatchEvent::QuestionAdvanced).is_err());
        assert!(next_state(MatchState::InProgress, MatchEvent::Joined).is_err());
    }

    #[test]
    fn random_event_interleavings_only_move_forward() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let mut state = MatchState::Waiting;
            for _ in 0..rng.random_range(1..40) {
                let event = EVENTS[rng.random_range(0..EVENTS.len())];
                if let Ok(next) = next_state(state, event) {
                    assert!(is_forward(state, next), "{state:?} -> {next:?}");
                    state = next;
                }
            }
        }
    }
}
