use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage reachability and the number of live connections, logging storage issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let connections = state.sessions().connection_count();
    if state.is_degraded().await {
        HealthResponse::degraded(connections)
    } else {
        HealthResponse::ok(connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::testing::{TestClient, test_config, test_state},
        state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_without_store() {
        let state = AppState::new(test_config());
        let status = health_status(&state).await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.connections, 0);
    }

    #[tokio::test]
    async fn counts_live_connections() {
        let state = test_state();
        let _client = TestClient::connect(&state);
        let status = health_status(&state).await;
        assert_eq!(status.status, "ok");
        assert_eq!(status.connections, 1);
    }
}
