use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::info;

use crate::{
    config::AppConfig,
    dao::{identity::IdentityProvider, room_store::RoomStore},
    services::RoomServices,
};

#[cfg(feature = "music-proxy")]
use crate::services::music_service::{self, MusicCatalog};

/// Per-subscription push-channel state machine.
pub mod feed_machine;
/// Per-viewer room session state machine.
pub mod session_machine;

pub type SharedState = Arc<AppState>;

/// Central application state holding the injected store and identity handles and
/// the services wired against them.
pub struct AppState {
    store: Arc<dyn RoomStore>,
    identity: Arc<dyn IdentityProvider>,
    services: RoomServices,
    #[cfg(feature = "music-proxy")]
    music: Option<MusicCatalog>,
    disposed: AtomicBool,
}

impl AppState {
    /// Wire the services against explicitly constructed collaborators.
    pub fn new(
        store: Arc<dyn RoomStore>,
        identity: Arc<dyn IdentityProvider>,
        config: AppConfig,
    ) -> SharedState {
        let services = RoomServices::new(store.clone(), &config);
        Arc::new(Self {
            #[cfg(feature = "music-proxy")]
            music: music_service::from_credentials(config.spotify.clone()),
            store,
            identity,
            services,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn services(&self) -> &RoomServices {
        &self.services
    }

    /// Music catalog proxy, when credentials are configured.
    #[cfg(feature = "music-proxy")]
    pub fn music(&self) -> Option<&MusicCatalog> {
        self.music.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Close every change feed; open room subscriptions transition to closed.
    /// Calling it more than once is a no-op.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.store.shutdown().await;
        info!("application state disposed; change feeds closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        dao::{
            identity::MemoryIdentity,
            models::RoomType,
            room_store::MemoryRoomStore,
        },
        state::feed_machine::FeedPhase,
    };

    #[tokio::test]
    async fn dispose_closes_open_subscriptions() {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
        let identity = Arc::new(MemoryIdentity::new(store.clone()));
        let state = AppState::new(store, identity, AppConfig::default());
        let room = state
            .services()
            .directory
            .create_room(None, "Lounge", RoomType::Music, None)
            .await
            .unwrap()
            .room;
        let mut subscription = state.services().fanout.subscribe(room.id);
        let mut phase = subscription.phase_watch();
        timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();

        state.dispose().await;
        state.dispose().await;

        timeout(
            Duration::from_secs(5),
            phase.wait_for(|phase| *phase == FeedPhase::Closed),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(state.is_disposed());
    }
}
