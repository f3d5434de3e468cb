use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the room store and report whether realtime sync is fully available.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    if state.is_disposed() {
        return HealthResponse::shutting_down();
    }

    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "room store health check failed");
            HealthResponse::degraded()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{identity::MemoryIdentity, room_store::MemoryRoomStore},
        state::AppState,
    };

    #[tokio::test]
    async fn reports_store_outage_and_shutdown() {
        let store = Arc::new(MemoryRoomStore::new());
        let identity = Arc::new(MemoryIdentity::new(store.clone()));
        let state = AppState::new(store.clone(), identity, AppConfig::default());

        assert_eq!(health_status(&state).await.status, "ok");

        store.set_available(false);
        let degraded = health_status(&state).await;
        assert_eq!(degraded.status, "degraded");
        assert!(!degraded.store_reachable);

        store.set_available(true);
        state.dispose().await;
        assert_eq!(health_status(&state).await.status, "shutting-down");
    }
}
