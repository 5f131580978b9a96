use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the caller's player id.
pub const PLAYER_ID_HEADER: &str = "x-player-id";
const MAX_PLAYER_ID_LENGTH: usize = 128;

/// Identity of the calling player, taken from the `X-Player-Id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerId(pub String);

impl<S> FromRequestParts<S> for PlayerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PLAYER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .ok_or_else(|| {
                AppError::Unauthorized("missing player id header `X-Player-Id`".into())
            })?;

        if raw.is_empty() || raw.len() > MAX_PLAYER_ID_LENGTH {
            return Err(AppError::Unauthorized("invalid player id".into()));
        }
        Ok(PlayerId(raw.to_owned()))
    }
}
