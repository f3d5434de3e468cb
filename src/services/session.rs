//! Client room session: per-viewer view-model composing the directory, membership,
//! playback, message log and fan-out bridge.
//!
//! The session owns one [`RoomSubscription`] while it is in a room. A pump task
//! applies the subscription's signals to the view; every write is tagged with the
//! session generation it was fetched under and dropped when the session has moved on.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::{
    sync::{RwLock, broadcast},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        identity::AuthContext,
        models::{
            MessageWithProfile, ParticipantWithProfile, ProfileEntity, RoomDetails, RoomEntity,
            RoomId, RoomType, UserId,
        },
    },
    error::ServiceError,
    services::{
        RoomServices,
        fanout::{FeedSignal, ReconcileAction, RoomSubscription},
    },
    state::{
        feed_machine::FeedPhase,
        session_machine::{SessionEvent, SessionPhase, SessionStateMachine},
    },
};

const NOTICE_CAPACITY: usize = 32;

/// Local-only presentation flags; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalFlags {
    /// Player shown fullscreen.
    pub fullscreen: bool,
    /// Call panel open.
    pub call_visible: bool,
    /// Microphone on.
    pub mic_enabled: bool,
    /// Camera on.
    pub camera_enabled: bool,
}

/// Merged view of the room currently shown to the viewer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    pub room: Option<RoomEntity>,
    pub host: Option<ProfileEntity>,
    /// Ordered by join time ascending.
    pub participants: Vec<ParticipantWithProfile>,
    /// Newest page, ascending by creation time.
    pub messages: Vec<MessageWithProfile>,
    pub flags: LocalFlags,
    /// Push-channel phase of the room subscription, `None` outside a room.
    pub feed_phase: Option<FeedPhase>,
}

impl RoomView {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

/// Severity of a [`SessionNotice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational toast.
    Info,
    /// A failed operation.
    Error,
}

/// User-visible notification raised by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

struct SessionShared {
    services: RoomServices,
    auth: AuthContext,
    machine: RwLock<SessionStateMachine>,
    view: RwLock<RoomView>,
    notices: broadcast::Sender<SessionNotice>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

/// One viewer's session. Dropping it stops the room subscription.
pub struct RoomSession {
    shared: Arc<SessionShared>,
}

impl RoomSession {
    pub fn new(services: RoomServices, auth: AuthContext) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                services,
                auth,
                machine: RwLock::new(SessionStateMachine::new()),
                view: RwLock::new(RoomView::default()),
                notices,
                pump: StdMutex::new(None),
            }),
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.shared.machine.read().await.phase()
    }

    pub async fn generation(&self) -> u64 {
        self.shared.machine.read().await.generation()
    }

    /// Snapshot of the current view-model.
    pub async fn view(&self) -> RoomView {
        self.shared.view.read().await.clone()
    }

    /// Receive user-visible notifications.
    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.shared.notices.subscribe()
    }

    /// Create a room hosted by the current user and enter it.
    pub async fn create_room(
        &self,
        name: &str,
        room_type: RoomType,
        content_ref: Option<String>,
    ) -> Result<RoomDetails, ServiceError> {
        self.shared.transition(SessionEvent::CreateRequested).await?;

        let created = async {
            let user = self.shared.user_id().await?;
            self.shared
                .services
                .directory
                .create_room(user, name, room_type, content_ref)
                .await
        }
        .await;

        self.enter_or_fail(created, "Could not create room", "Room created")
            .await
    }

    /// Look a room up by its join code and enter it.
    pub async fn join_by_code(&self, code: &str) -> Result<RoomDetails, ServiceError> {
        self.shared.transition(SessionEvent::JoinRequested).await?;

        let joined = async {
            let user = self.shared.user_id().await?;
            self.shared
                .services
                .directory
                .join_room_by_code(user, code)
                .await
        }
        .await;

        self.enter_or_fail(joined, "Could not join room", "Joined room")
            .await
    }

    async fn enter_or_fail(
        &self,
        outcome: Result<RoomDetails, ServiceError>,
        failure_title: &str,
        success_title: &str,
    ) -> Result<RoomDetails, ServiceError> {
        match outcome {
            Ok(details) => {
                self.enter(&details).await?;
                self.shared.notify(NoticeLevel::Info, success_title, &details.room.name);
                Ok(details)
            }
            Err(err) => {
                self.shared.transition(SessionEvent::EnterFailed).await?;
                self.shared.notify(NoticeLevel::Error, failure_title, &err.to_string());
                Err(err)
            }
        }
    }

    async fn enter(&self, details: &RoomDetails) -> Result<(), ServiceError> {
        let room_id = details.room.id;
        let generation = {
            let mut machine = self.shared.machine.write().await;
            machine.apply(SessionEvent::Entered(room_id))?;
            machine.generation()
        };

        {
            let mut view = self.shared.view.write().await;
            *view = RoomView {
                room: Some(details.room.clone()),
                host: details.host.clone(),
                participants: details.participants.clone(),
                messages: Vec::new(),
                flags: LocalFlags::default(),
                feed_phase: Some(FeedPhase::Connecting),
            };
        }
        if let Err(err) = self.shared.refresh_messages(generation, room_id).await {
            self.shared
                .notify(NoticeLevel::Error, "Could not load messages", &err.to_string());
        }

        let subscription = self.shared.services.fanout.subscribe(room_id);
        let pump = spawn_pump(self.shared.clone(), generation, subscription);
        self.shared.replace_pump(Some(pump));
        info!(%room_id, generation, "entered room");
        Ok(())
    }

    /// Leave the current room. The local view is always torn down; a failing
    /// membership delete is reported as a notice.
    pub async fn leave(&self) -> Result<(), ServiceError> {
        let room_id = {
            let mut machine = self.shared.machine.write().await;
            let SessionPhase::InRoom(room_id) = machine.phase() else {
                debug!(phase = ?machine.phase(), "leave outside a room ignored");
                return Ok(());
            };
            machine.apply(SessionEvent::LeaveRequested)?;
            room_id
        };

        if let Some(pump) = self.shared.replace_pump(None) {
            pump.abort();
            let _ = pump.await;
        }

        let left = async {
            let user = self.shared.user_id().await?;
            self.shared.services.membership.leave(room_id, user).await
        }
        .await;
        if let Err(err) = left {
            warn!(%room_id, error = %err, "membership delete failed while leaving");
            self.shared
                .notify(NoticeLevel::Error, "Could not leave room", &err.to_string());
        }

        self.shared.finish_leave().await?;
        info!(%room_id, "left room");
        Ok(())
    }

    /// Leave the current room, if any, and release the session.
    pub async fn close(self) {
        if let Err(err) = self.leave().await {
            warn!(error = %err, "session close failed");
        }
    }

    /// Send a chat message to the current room and refresh the log.
    pub async fn send_message(&self, body: &str) -> Result<(), ServiceError> {
        let (generation, room_id) = self.shared.current_room().await?;
        let sent = async {
            let user = self.shared.user_id().await?;
            self.shared
                .services
                .messages
                .append(room_id, user, body)
                .await?;
            self.shared.refresh_messages(generation, room_id).await
        }
        .await;

        sent.inspect_err(|err| {
            self.shared
                .notify(NoticeLevel::Error, "Could not send message", &err.to_string())
        })
    }

    /// Publish play/pause/seek for the current room.
    pub async fn update_playback(&self, is_playing: bool, position: f64) -> Result<(), ServiceError> {
        let (generation, room_id) = self.shared.current_room().await?;
        let updated = async {
            let user = self.shared.user_id().await?;
            self.shared
                .services
                .playback
                .update_playback(user, room_id, is_playing, position)
                .await
        }
        .await;
        self.merge_written_room(generation, room_id, updated, "Could not update playback")
            .await
    }

    /// Switch the current room to new content.
    pub async fn update_content(&self, content_ref: Option<String>) -> Result<(), ServiceError> {
        let (generation, room_id) = self.shared.current_room().await?;
        let updated = async {
            let user = self.shared.user_id().await?;
            self.shared
                .services
                .playback
                .update_content(user, room_id, content_ref)
                .await
        }
        .await;
        self.merge_written_room(generation, room_id, updated, "Could not change content")
            .await
    }

    async fn merge_written_room(
        &self,
        generation: u64,
        room_id: RoomId,
        updated: Result<RoomEntity, ServiceError>,
        failure_title: &str,
    ) -> Result<(), ServiceError> {
        match updated {
            Ok(room) => {
                self.shared
                    .commit(generation, room_id, |view| view.room = Some(room))
                    .await;
                Ok(())
            }
            Err(err) => {
                self.shared
                    .notify(NoticeLevel::Error, failure_title, &err.to_string());
                Err(err)
            }
        }
    }

    /// Authoritative pull of room, roster and messages for the current room.
    pub async fn reconcile(&self) -> Result<(), ServiceError> {
        let (generation, room_id) = self.shared.current_room().await?;
        self.shared
            .reconcile(generation, room_id)
            .await
            .inspect_err(|err| {
                self.shared
                    .notify(NoticeLevel::Error, "Could not refresh room", &err.to_string())
            })
    }

    /// Whether the current user holds a membership row for the current room.
    pub async fn is_user_in_room(&self) -> bool {
        let Ok((_, room_id)) = self.shared.current_room().await else {
            return false;
        };
        let user = match self.shared.user_id().await {
            Ok(user) => user,
            Err(err) => {
                warn!(%room_id, error = %err, "current user lookup failed");
                return false;
            }
        };
        self.shared
            .services
            .membership
            .is_user_in_room(room_id, user)
            .await
    }

    /// Shareable link to the current room, `<base>/<page>?room=<CODE>`.
    pub async fn share_link(&self, base_url: &str) -> Option<String> {
        let view = self.shared.view.read().await;
        view.room.as_ref().map(|room| {
            format!(
                "{}/{}?room={}",
                base_url.trim_end_matches('/'),
                room.room_type.page_path(),
                room.code
            )
        })
    }

    pub async fn toggle_fullscreen(&self) -> Result<bool, ServiceError> {
        self.update_flags(|flags| {
            flags.fullscreen = !flags.fullscreen;
            flags.fullscreen
        })
        .await
    }

    /// Show or hide the call panel. Hiding it turns local capture off.
    pub async fn toggle_call(&self) -> Result<bool, ServiceError> {
        self.update_flags(|flags| {
            flags.call_visible = !flags.call_visible;
            if !flags.call_visible {
                flags.mic_enabled = false;
                flags.camera_enabled = false;
            }
            flags.call_visible
        })
        .await
    }

    pub async fn toggle_mic(&self) -> Result<bool, ServiceError> {
        self.update_flags(|flags| {
            flags.mic_enabled = flags.call_visible && !flags.mic_enabled;
            flags.mic_enabled
        })
        .await
    }

    pub async fn toggle_camera(&self) -> Result<bool, ServiceError> {
        self.update_flags(|flags| {
            flags.camera_enabled = flags.call_visible && !flags.camera_enabled;
            flags.camera_enabled
        })
        .await
    }

    async fn update_flags(
        &self,
        update: impl FnOnce(&mut LocalFlags) -> bool,
    ) -> Result<bool, ServiceError> {
        let (generation, room_id) = self.shared.current_room().await?;
        let mut result = false;
        self.shared
            .commit(generation, room_id, |view| result = update(&mut view.flags))
            .await;
        Ok(result)
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(pump) = self.shared.replace_pump(None) {
            pump.abort();
        }
    }
}

impl SessionShared {
    async fn user_id(&self) -> Result<Option<UserId>, ServiceError> {
        Ok(self.auth.current_user_id().await?)
    }

    async fn transition(&self, event: SessionEvent) -> Result<SessionPhase, ServiceError> {
        Ok(self.machine.write().await.apply(event)?)
    }

    async fn current_room(&self) -> Result<(u64, RoomId), ServiceError> {
        let machine = self.machine.read().await;
        match machine.phase() {
            SessionPhase::InRoom(room_id) => Ok((machine.generation(), room_id)),
            phase => Err(ServiceError::InvalidState(format!(
                "not in a room (phase {phase:?})"
            ))),
        }
    }

    fn replace_pump(&self, pump: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.pump.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, pump),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), pump),
        }
    }

    fn notify(&self, level: NoticeLevel, title: &str, description: &str) {
        let _ = self.notices.send(SessionNotice {
            level,
            title: title.to_string(),
            description: description.to_string(),
        });
    }

    /// Apply `update` to the view if the session still shows `room_id` under `generation`.
    async fn commit(
        &self,
        generation: u64,
        room_id: RoomId,
        update: impl FnOnce(&mut RoomView),
    ) -> bool {
        let mut view = self.view.write().await;
        if !self.machine.read().await.is_current(generation, room_id) {
            debug!(%room_id, generation, "discarding stale room update");
            return false;
        }
        update(&mut view);
        true
    }

    async fn refresh_messages(&self, generation: u64, room_id: RoomId) -> Result<(), ServiceError> {
        let messages = self.services.messages.list(room_id, None).await?;
        self.commit(generation, room_id, |view| view.messages = messages)
            .await;
        Ok(())
    }

    async fn refresh_participants(
        &self,
        generation: u64,
        room_id: RoomId,
    ) -> Result<(), ServiceError> {
        let participants = self.services.membership.list_participants(room_id).await?;
        self.commit(generation, room_id, |view| view.participants = participants)
            .await;
        Ok(())
    }

    async fn reconcile(&self, generation: u64, room_id: RoomId) -> Result<(), ServiceError> {
        let details = self
            .services
            .directory
            .room_with_participants(room_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}` not found")))?;
        let messages = self.services.messages.list(room_id, None).await?;
        self.commit(generation, room_id, |view| {
            view.room = Some(details.room);
            view.host = details.host;
            view.participants = details.participants;
            view.messages = messages;
        })
        .await;
        Ok(())
    }

    /// Apply one fan-out signal. Returns `false` once the pump should stop.
    async fn apply_signal(&self, generation: u64, signal: FeedSignal) -> bool {
        let room_id = signal.room_id;
        if !self.machine.read().await.is_current(generation, room_id) {
            return false;
        }

        let outcome = match signal.action {
            ReconcileAction::Full => self.reconcile(generation, room_id).await,
            ReconcileAction::MergeRoom(room) => {
                self.commit(generation, room_id, |view| view.room = Some(room))
                    .await;
                Ok(())
            }
            ReconcileAction::Participants => self.refresh_participants(generation, room_id).await,
            ReconcileAction::Messages => self.refresh_messages(generation, room_id).await,
            ReconcileAction::RoomRemoved => {
                self.close_removed_room(generation, room_id).await;
                return false;
            }
        };

        if let Err(err) = outcome {
            warn!(%room_id, source = ?signal.source, error = %err, "room reconciliation failed");
            self.notify(NoticeLevel::Error, "Could not refresh room", &err.to_string());
        }
        true
    }

    async fn close_removed_room(&self, generation: u64, room_id: RoomId) {
        {
            let mut machine = self.machine.write().await;
            if !machine.is_current(generation, room_id)
                || machine.apply(SessionEvent::LeaveRequested).is_err()
            {
                return;
            }
        }
        // The pump is the caller; detach instead of aborting it.
        drop(self.replace_pump(None));
        if let Err(err) = self.finish_leave().await {
            warn!(%room_id, error = %err, "teardown after room removal failed");
        }
        info!(%room_id, "room was deleted; session closed");
        self.notify(
            NoticeLevel::Info,
            "Room closed",
            "The room was deleted by its host",
        );
    }

    async fn finish_leave(&self) -> Result<(), ServiceError> {
        *self.view.write().await = RoomView::default();
        self.transition(SessionEvent::Left).await?;
        Ok(())
    }

    async fn record_feed_phase(&self, generation: u64, room_id: RoomId, phase: FeedPhase) {
        self.commit(generation, room_id, |view| view.feed_phase = Some(phase))
            .await;
    }
}

fn spawn_pump(
    shared: Arc<SessionShared>,
    generation: u64,
    mut subscription: RoomSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let room_id = subscription.room_id();
        while let Some(signal) = subscription.recv().await {
            shared
                .record_feed_phase(generation, room_id, subscription.phase())
                .await;
            if !shared.apply_signal(generation, signal).await {
                break;
            }
        }
        debug!(%room_id, generation, "session pump stopped");
    })
}
