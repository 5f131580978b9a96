use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz duel daemon.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::lobby::list_open_matches,
        crate::routes::lobby::join_by_code,
        crate::routes::matches::create_match,
        crate::routes::matches::join_match,
        crate::routes::matches::submit_answer,
        crate::routes::matches::view_stream,
        crate::routes::matches::leave_match,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::lobby::OpenMatchSummary,
            crate::dto::lobby::LobbyResponse,
            crate::dto::lobby::JoinByCodeRequest,
            crate::dto::matches::CreateMatchRequest,
            crate::dto::matches::SubmitAnswerRequest,
            crate::dto::matches::MatchSummary,
            crate::dto::view::MatchViewState,
            crate::dto::view::ConnectionStatus,
            crate::dto::view::MatchOutcome,
            crate::state::match_record::MatchState,
            crate::state::match_record::Side,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "lobby", description = "Open match discovery and join by code"),
        (name = "matches", description = "Match lifecycle and live views"),
    )
)]
pub struct ApiDoc;
