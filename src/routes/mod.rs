use axum::Router;

use crate::state::SharedState;

pub mod auth;
pub mod docs;
pub mod health;
pub mod messages;
#[cfg(feature = "music-proxy")]
pub mod music;
pub mod rooms;
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(auth::router())
        .merge(rooms::router())
        .merge(messages::router())
        .merge(sse::router());

    #[cfg(feature = "music-proxy")]
    let api_router = api_router.merge(music::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
