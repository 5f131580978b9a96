//! Match lifecycle operations exposed to players: create, join, answer, view and leave.

use std::time::Duration;

use tokio::{sync::watch, time::timeout};
use tracing::{debug, info};

use crate::{
    dto::{
        matches::{CreateMatchRequest, MatchSummary},
        view::MatchViewState,
    },
    error::ServiceError,
    services::{
        match_controller::{MatchController, MatchHandle, Seat},
        match_repository::MatchRepository,
    },
    state::{
        SharedState,
        match_record::{AnswerLetter, MatchRecord, Side},
    },
};

/// How long an answer waits for a freshly attached controller to load the match.
const LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a new match hosted by `player_id` and start its controller.
pub async fn create_match(
    state: &SharedState,
    player_id: &str,
    request: CreateMatchRequest,
) -> Result<MatchSummary, ServiceError> {
    let repository = state.repository().await?;
    let questions = state.questions();

    let topic = match request.topic.as_deref() {
        Some(topic) => topic,
        None => questions
            .default_set()
            .map(|(topic, _)| topic)
            .ok_or_else(|| ServiceError::InvalidState("no question set configured".into()))?,
    };
    let level = match request.level.as_deref() {
        Some(level) => level,
        None => questions
            .default_level(topic)
            .ok_or_else(|| ServiceError::InvalidInput(format!("unknown topic `{topic}`")))?,
    };

    let deck = questions
        .deal(topic, level, &mut rand::rng())
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown question set `{topic}/{level}`")))?;

    let record = repository.create_match(player_id, deck).await?;
    info!(match_id = %record.match_id, host_id = player_id, topic, level, "match created");

    attach_controller(state, repository, &record, player_id, Side::Host);
    Ok(MatchSummary::new(&record, Side::Host))
}

/// Take the joiner seat of `match_id` and start the joiner's controller.
pub async fn join_match(
    state: &SharedState,
    player_id: &str,
    match_id: &str,
) -> Result<MatchSummary, ServiceError> {
    let repository = state.repository().await?;
    let record = repository.join_match(match_id, player_id).await?;
    info!(match_id, joiner_id = player_id, "match joined");

    attach_controller(state, repository, &record, player_id, Side::Joiner);
    Ok(MatchSummary::new(&record, Side::Joiner))
}

/// Forward an answer to the player's controller, attaching one if needed.
pub async fn submit_answer(
    state: &SharedState,
    player_id: &str,
    match_id: &str,
    letter: AnswerLetter,
) -> Result<(), ServiceError> {
    let handle = controller(state, player_id, match_id).await?;

    let mut view = handle.observe();
    let loaded = matches!(
        timeout(LOAD_TIMEOUT, view.wait_for(|view| view.state.is_some())).await,
        Ok(Ok(_))
    );
    if !loaded {
        return Err(ServiceError::InvalidState(format!(
            "match `{match_id}` could not be loaded"
        )));
    }

    handle.submit_answer(letter).await
}

/// Subscribe to the player's view of `match_id`, resuming a controller if none runs.
pub async fn attach_view(
    state: &SharedState,
    player_id: &str,
    match_id: &str,
) -> Result<watch::Receiver<MatchViewState>, ServiceError> {
    Ok(controller(state, player_id, match_id).await?.observe())
}

/// Stop the player's controller for `match_id`. Returns whether one was running.
pub fn leave_match(state: &SharedState, player_id: &str, match_id: &str) -> bool {
    match state
        .controllers()
        .remove(&(match_id.to_string(), player_id.to_string()))
    {
        Some((_, handle)) => {
            handle.leave();
            info!(match_id, player_id, "player left match");
            true
        }
        None => false,
    }
}

/// Running controller of `player_id` in `match_id`, or a new one when the
/// player takes part in the match.
async fn controller(
    state: &SharedState,
    player_id: &str,
    match_id: &str,
) -> Result<MatchHandle, ServiceError> {
    let key = (match_id.to_string(), player_id.to_string());
    if let Some(handle) = state.controllers().get(&key)
        && handle.is_running()
    {
        return Ok(handle.clone());
    }

    let repository = state.repository().await?;
    let record = repository.get(match_id).await?;
    let side = record.side_of(player_id).ok_or_else(|| {
        ServiceError::Unauthorized(format!("player `{player_id}` is not part of match `{match_id}`"))
    })?;
    debug!(match_id, player_id, %side, "resuming match controller");
    Ok(attach_controller(state, repository, &record, player_id, side))
}

/// Register a controller for `(match, player)` unless a live one already exists.
fn attach_controller(
    state: &SharedState,
    repository: MatchRepository,
    record: &MatchRecord,
    player_id: &str,
    side: Side,
) -> MatchHandle {
    state.controllers().retain(|_, handle| handle.is_running());

    let spawn = || {
        MatchController::spawn(
            repository,
            state.questions().clone(),
            state.controller_settings().clone(),
            Seat {
                match_id: record.match_id.clone(),
                player_id: player_id.to_string(),
                side,
            },
            state.shutdown_token().child_token(),
        )
    };

    state
        .controllers()
        .entry((record.match_id.clone(), player_id.to_string()))
        .or_insert_with(spawn)
        .clone()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::match_store::memory::MemoryMatchStore,
        state::{AppState, match_record::MatchState},
    };

    async fn state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state
            .install_match_store(Arc::new(MemoryMatchStore::new()))
            .await;
        state
    }

    #[tokio::test]
    async fn degraded_state_rejects_match_creation() {
        let state = AppState::new(AppConfig::default());
        let result = create_match(&state, "alice", CreateMatchRequest::default()).await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
    }

    #[tokio::test]
    async fn create_uses_the_default_set_and_starts_a_controller() {
        let state = state().await;
        let summary = create_match(&state, "alice", CreateMatchRequest::default())
            .await
            .unwrap();
        assert_eq!(summary.topic, "vocabulary");
        assert_eq!(summary.my_side, Side::Host);
        assert!(
            state
                .controllers()
                .contains_key(&(summary.match_id.clone(), "alice".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_question_set_is_rejected() {
        let state = state().await;
        let request = CreateMatchRequest {
            topic: Some("astronomy".into()),
            level: None,
        };
        assert!(matches!(
            create_match(&state, "alice", request).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn topic_without_level_uses_the_topic_default() {
        let state = state().await;
        let request = CreateMatchRequest {
            topic: Some("grammar".into()),
            level: None,
        };
        let summary = create_match(&state, "alice", request).await.unwrap();
        assert_eq!((summary.topic.as_str(), summary.level.as_str()), ("grammar", "a2"));
    }

    #[tokio::test]
    async fn strangers_cannot_attach_a_view() {
        let state = state().await;
        let summary = create_match(&state, "alice", CreateMatchRequest::default())
            .await
            .unwrap();
        join_match(&state, "bob", &summary.match_id).await.unwrap();
        assert!(matches!(
            attach_view(&state, "mallory", &summary.match_id).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn leaving_resumes_on_next_view() {
        let state = state().await;
        let summary = create_match(&state, "alice", CreateMatchRequest::default())
            .await
            .unwrap();
        join_match(&state, "bob", &summary.match_id).await.unwrap();

        assert!(leave_match(&state, "bob", &summary.match_id));
        assert!(!leave_match(&state, "bob", &summary.match_id));

        let mut view = attach_view(&state, "bob", &summary.match_id).await.unwrap();
        let state_seen = timeout(
            Duration::from_secs(2),
            view.wait_for(|view| view.state == Some(MatchState::InProgress)),
        )
        .await;
        assert!(matches!(state_seen, Ok(Ok(_))));
    }
}
