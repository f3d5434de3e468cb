use std::sync::Arc;

use crate::{config::AppConfig, dao::room_store::RoomStore};

/// Join-code generation and normalization.
pub mod codes;
/// Room creation, lookup, update and deletion.
pub mod directory;
/// OpenAPI documentation generation.
pub mod documentation;
/// Change-feed subscriptions with reconciliation poll and reconnect.
pub mod fanout;
/// Health check service.
pub mod health_service;
/// Participant join/leave and roster.
pub mod membership;
/// Append-only chat log.
pub mod message_log;
/// Spotify catalog proxy.
#[cfg(feature = "music-proxy")]
pub mod music_service;
/// Playback and content updates.
pub mod playback;
/// Current-user profile reads and updates.
pub mod profiles;
/// Per-viewer room session view-model.
pub mod session;
/// Server-Sent Events bridge for room subscriptions.
pub mod sse_service;

use self::{
    directory::RoomDirectory, fanout::FanoutBridge, membership::MembershipManager,
    message_log::MessageLog, playback::PlaybackCoordinator, profiles::ProfileService,
};

/// Core components wired against one store handle.
#[derive(Clone)]
pub struct RoomServices {
    /// Room lifecycle and lookup.
    pub directory: RoomDirectory,
    /// Join and leave.
    pub membership: MembershipManager,
    /// Host-driven play, pause and seek.
    pub playback: PlaybackCoordinator,
    /// Room chat.
    pub messages: MessageLog,
    /// Live room subscriptions.
    pub fanout: FanoutBridge,
    /// Profile lookups.
    pub profiles: ProfileService,
}

impl RoomServices {
    pub fn new(store: Arc<dyn RoomStore>, config: &AppConfig) -> Self {
        let membership = MembershipManager::new(store.clone());
        let directory = RoomDirectory::new(
            store.clone(),
            membership.clone(),
            config.code_attempts,
            config.host_policy,
        );
        Self {
            playback: PlaybackCoordinator::new(directory.clone()),
            messages: MessageLog::new(
                store.clone(),
                config.message_page_size,
                config.max_message_page_size,
            ),
            fanout: FanoutBridge::new(store.clone(), config),
            profiles: ProfileService::new(store),
            directory,
            membership,
        }
    }
}
