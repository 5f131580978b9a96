use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Report store availability while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.match_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "match store health check failed");
            }
        }
        None => warn!("match store unavailable (degraded mode)"),
    }

    let status = if state.is_degraded().await {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };
    let running_controllers = state
        .controllers()
        .iter()
        .filter(|entry| entry.value().is_running())
        .count();

    HealthResponse {
        status,
        running_controllers,
    }
}
