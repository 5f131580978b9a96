use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use tracing::info;

use crate::{
    dto::matches::{CreateMatchRequest, MatchSummary, SubmitAnswerRequest},
    error::AppError,
    routes::player::PlayerId,
    services::{lobby_service, match_service, sse_service},
    state::{SharedState, match_record::AnswerLetter},
};

/// Player endpoints driving a single match.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/matches", post(create_match))
        .route("/matches/{id}/join", post(join_match))
        .route("/matches/{id}/answer", post(submit_answer))
        .route("/matches/{id}/view", get(view_stream).delete(leave_match))
}

/// Open a new match hosted by the caller.
#[utoipa::path(
    post,
    path = "/matches",
    tag = "matches",
    params(("X-Player-Id" = String, Header, description = "Identifier of the calling player")),
    request_body = CreateMatchRequest,
    responses(
        (status = 201, description = "Match created", body = MatchSummary),
        (status = 400, description = "Unknown question set"),
        (status = 503, description = "Match store unavailable")
    )
)]
pub async fn create_match(
    State(state): State<SharedState>,
    PlayerId(player_id): PlayerId,
    Valid(Json(payload)): Valid<Json<CreateMatchRequest>>,
) -> Result<(StatusCode, Json<MatchSummary>), AppError> {
    let summary = match_service::create_match(&state, &player_id, payload).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Join a match selected from the lobby.
#[utoipa::path(
    post,
    path = "/matches/{id}/join",
    tag = "matches",
    params(
        ("X-Player-Id" = String, Header, description = "Identifier of the calling player"),
        ("id" = String, Path, description = "Identifier of the match to join")
    ),
    responses(
        (status = 200, description = "Match joined", body = MatchSummary),
        (status = 404, description = "Match not found"),
        (status = 409, description = "Match already has an opponent")
    )
)]
pub async fn join_match(
    State(state): State<SharedState>,
    PlayerId(player_id): PlayerId,
    Path(id): Path<String>,
) -> Result<Json<MatchSummary>, AppError> {
    Ok(Json(
        lobby_service::join_by_selection(&state, &player_id, &id).await?,
    ))
}

/// Submit the caller's answer to the current question.
#[utoipa::path(
    post,
    path = "/matches/{id}/answer",
    tag = "matches",
    params(
        ("X-Player-Id" = String, Header, description = "Identifier of the calling player"),
        ("id" = String, Path, description = "Identifier of the match")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 204, description = "Answer recorded"),
        (status = 400, description = "Unknown option letter"),
        (status = 409, description = "Match not in progress")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    PlayerId(player_id): PlayerId,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<StatusCode, AppError> {
    let letter = payload
        .letter
        .parse::<AnswerLetter>()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;
    match_service::submit_answer(&state, &player_id, &id, letter).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream the caller's view of a match, resuming its controller if needed.
#[utoipa::path(
    get,
    path = "/matches/{id}/view",
    tag = "matches",
    params(
        ("X-Player-Id" = String, Header, description = "Identifier of the calling player"),
        ("id" = String, Path, description = "Identifier of the match")
    ),
    responses(
        (status = 200, description = "`match.view` events carrying MatchViewState", content_type = "text/event-stream", body = String),
        (status = 401, description = "Caller is not part of the match")
    )
)]
pub async fn view_stream(
    State(state): State<SharedState>,
    PlayerId(player_id): PlayerId,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let views = match_service::attach_view(&state, &player_id, &id).await?;
    info!(match_id = %id, player_id = %player_id, "new match view SSE connection");
    Ok(sse_service::to_sse_stream(views, id))
}

/// Leave a match: stop the caller's controller. The match itself is not forfeited.
#[utoipa::path(
    delete,
    path = "/matches/{id}/view",
    tag = "matches",
    params(
        ("X-Player-Id" = String, Header, description = "Identifier of the calling player"),
        ("id" = String, Path, description = "Identifier of the match")
    ),
    responses((status = 204, description = "Controller stopped"))
)]
pub async fn leave_match(
    State(state): State<SharedState>,
    PlayerId(player_id): PlayerId,
    Path(id): Path<String>,
) -> StatusCode {
    match_service::leave_match(&state, &player_id, &id);
    StatusCode::NO_CONTENT
}
