//! Lobby: discover open matches and join them by code or by selection.

use futures::future::join_all;

use crate::{
    dto::{
        lobby::{LobbyResponse, OpenMatchSummary},
        matches::MatchSummary,
    },
    error::ServiceError,
    services::match_service,
    state::SharedState,
};

/// Waiting matches, newest first, with their host's profile.
pub async fn list_open_matches(state: &SharedState) -> Result<LobbyResponse, ServiceError> {
    let repository = state.repository().await?;
    let records = repository.list_open_matches().await?;

    let profiles = state.profiles();
    let lookups = records
        .iter()
        .map(|record| profiles.get_profile(&record.host_id));
    let matches = records
        .iter()
        .zip(join_all(lookups).await)
        .map(|(record, profile)| OpenMatchSummary::new(record, profile))
        .collect();

    Ok(LobbyResponse { matches })
}

/// Join the match whose code the player typed in.
pub async fn join_by_code(
    state: &SharedState,
    player_id: &str,
    code: &str,
) -> Result<MatchSummary, ServiceError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ServiceError::InvalidInput("join code is empty".into()));
    }
    match_service::join_match(state, player_id, code).await
}

/// Join a match picked from the lobby listing. The listing may be stale, so
/// the match can be gone or full by now.
pub async fn join_by_selection(
    state: &SharedState,
    player_id: &str,
    match_id: &str,
) -> Result<MatchSummary, ServiceError> {
    match_service::join_match(state, player_id, match_id).await
}
