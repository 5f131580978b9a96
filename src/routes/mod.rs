use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod lobby;
pub mod matches;
pub mod player;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(lobby::router())
        .merge(matches::router())
        .merge(docs::router())
        .with_state(state)
}
