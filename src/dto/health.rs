use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok", "degraded" or "shutting-down").
    pub status: String,
    /// Whether the room store answered its probe.
    pub store_reachable: bool,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            store_reachable: true,
        }
    }

    /// The store could not be reached; realtime feeds fall back to polling.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            store_reachable: false,
        }
    }

    pub fn shutting_down() -> Self {
        Self {
            status: "shutting-down".to_string(),
            store_reachable: false,
        }
    }
}
