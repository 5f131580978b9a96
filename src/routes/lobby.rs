use axum::{Json, Router, extract::State, routing::{get, post}};
use axum_valid::Valid;

use crate::{
    dto::{
        lobby::{JoinByCodeRequest, LobbyResponse},
        matches::MatchSummary,
    },
    error::AppError,
    routes::player::PlayerId,
    services::lobby_service,
    state::SharedState,
};

/// Lobby endpoints: list open matches and join one by code.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/lobby", get(list_open_matches))
        .route("/lobby/join", post(join_by_code))
}

/// List matches waiting for an opponent, newest first.
#[utoipa::path(
    get,
    path = "/lobby",
    tag = "lobby",
    responses(
        (status = 200, description = "Open matches", body = LobbyResponse),
        (status = 503, description = "Match store unavailable")
    )
)]
pub async fn list_open_matches(
    State(state): State<SharedState>,
) -> Result<Json<LobbyResponse>, AppError> {
    Ok(Json(lobby_service::list_open_matches(&state).await?))
}

/// Join a match with the code shared by its host.
#[utoipa::path(
    post,
    path = "/lobby/join",
    tag = "lobby",
    params(("X-Player-Id" = String, Header, description = "Identifier of the calling player")),
    request_body = JoinByCodeRequest,
    responses(
        (status = 200, description = "Match joined", body = MatchSummary),
        (status = 404, description = "No match for this code"),
        (status = 409, description = "Match already has an opponent")
    )
)]
pub async fn join_by_code(
    State(state): State<SharedState>,
    PlayerId(player_id): PlayerId,
    Valid(Json(payload)): Valid<Json<JoinByCodeRequest>>,
) -> Result<Json<MatchSummary>, AppError> {
    Ok(Json(
        lobby_service::join_by_code(&state, &player_id, &payload.code).await?,
    ))
}
