//! Realtime fan-out bridge.
//!
//! Each [`RoomSubscription`] is backed by a driver task that holds the room's change
//! feed, classifies every notification into a [`ReconcileAction`] and forwards it to the
//! subscriber. A fixed-interval poll runs beside the push channel for the whole lifetime
//! of the subscription so that missed or dropped notifications are still picked up. A
//! lost feed is re-established with exponential backoff and followed by a full refresh.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast::error::RecvError, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    dao::{
        changes::{ChangeEvent, ChangeOp, ChangeTable},
        models::{RoomEntity, RoomId},
        room_store::{ChangeFeed, RoomStore},
        storage::StorageError,
    },
    state::feed_machine::{FeedEvent, FeedPhase, FeedStateMachine},
};

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// A change notification (or a feed lifecycle event).
    Push,
    /// The periodic reconciliation poll.
    Poll,
}

/// What the subscriber should refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Reload room, roster and messages.
    Full,
    /// Merge the committed room row into the local view.
    MergeRoom(RoomEntity),
    /// Reload the participant roster.
    Participants,
    /// Reload the message page.
    Messages,
    /// The room was deleted; tear the view down.
    RoomRemoved,
}

/// Signal delivered to a room subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSignal {
    /// Subscribed room.
    pub room_id: RoomId,
    /// Push notification or poll tick.
    pub source: SignalSource,
    /// Refresh the subscriber should run.
    pub action: ReconcileAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    MergeRoom,
    RoomRemoved,
    Participants,
    Messages,
}

/// Notification routing. Anything not listed is ignored.
const DISPATCH: &[(ChangeTable, ChangeOp, ActionKind)] = &[
    (ChangeTable::Rooms, ChangeOp::Update, ActionKind::MergeRoom),
    (ChangeTable::Rooms, ChangeOp::Delete, ActionKind::RoomRemoved),
    (ChangeTable::RoomParticipants, ChangeOp::Insert, ActionKind::Participants),
    (ChangeTable::RoomParticipants, ChangeOp::Update, ActionKind::Participants),
    (ChangeTable::RoomParticipants, ChangeOp::Delete, ActionKind::Participants),
    (ChangeTable::RoomMessages, ChangeOp::Insert, ActionKind::Messages),
];

/// Map a change notification to the refresh it requires.
pub fn classify(event: &ChangeEvent) -> Option<ReconcileAction> {
    let (_, _, kind) = DISPATCH
        .iter()
        .find(|(table, op, _)| *table == event.table && *op == event.operation)?;

    let action = match kind {
        ActionKind::MergeRoom => match event.new_room() {
            Some(room) => ReconcileAction::MergeRoom(room.clone()),
            None => ReconcileAction::Full,
        },
        ActionKind::RoomRemoved => ReconcileAction::RoomRemoved,
        ActionKind::Participants => ReconcileAction::Participants,
        ActionKind::Messages => ReconcileAction::Messages,
    };
    Some(action)
}

/// Opens room subscriptions against the store.
#[derive(Clone)]
pub struct FanoutBridge {
    store: Arc<dyn RoomStore>,
    poll_interval: Duration,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    capacity: usize,
}

impl FanoutBridge {
    pub fn new(store: Arc<dyn RoomStore>, config: &AppConfig) -> Self {
        // Tokio intervals reject a zero period.
        let floor = Duration::from_millis(1);
        let reconnect_initial = config.reconnect_initial.max(floor);
        Self {
            store,
            poll_interval: config.poll_interval.max(floor),
            reconnect_initial,
            reconnect_max: config.reconnect_max.max(reconnect_initial),
            capacity: config.feed_capacity.max(1),
        }
    }

    /// Start pushing signals for `room_id`. Dropping the subscription stops the feed and the poll.
    pub fn subscribe(&self, room_id: RoomId) -> RoomSubscription {
        let (signals_tx, signals_rx) = mpsc::channel(self.capacity);
        let (phase_tx, phase_rx) = watch::channel(FeedPhase::Connecting);

        let driver = FeedDriver {
            room_id,
            store: self.store.clone(),
            signals: signals_tx,
            phase: phase_tx,
            machine: FeedStateMachine::new(),
            feed: None,
            retry_at: None,
            retry_delay: self.reconnect_initial,
            reconnect_initial: self.reconnect_initial,
            reconnect_max: self.reconnect_max,
        };
        let task = tokio::spawn(driver.run(self.poll_interval));

        RoomSubscription {
            room_id,
            signals: signals_rx,
            phase: phase_rx,
            task: Some(task),
        }
    }
}

/// Live subscription to one room.
pub struct RoomSubscription {
    room_id: RoomId,
    signals: mpsc::Receiver<FeedSignal>,
    phase: watch::Receiver<FeedPhase>,
    task: Option<JoinHandle<()>>,
}

impl RoomSubscription {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Next signal, or `None` once the subscription has closed.
    pub async fn recv(&mut self) -> Option<FeedSignal> {
        self.signals.recv().await
    }

    /// Current push-channel phase.
    pub fn phase(&self) -> FeedPhase {
        *self.phase.borrow()
    }

    /// Watch push-channel phase changes.
    pub fn phase_watch(&self) -> watch::Receiver<FeedPhase> {
        self.phase.clone()
    }

    /// Stop the driver and wait until the feed receiver is released.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!(room_id = %self.room_id, "room subscription closed");
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Step {
    Detached,
    Poll,
    Change(Result<ChangeEvent, RecvError>),
    Retry,
}

struct FeedDriver {
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
    signals: mpsc::Sender<FeedSignal>,
    phase: watch::Sender<FeedPhase>,
    machine: FeedStateMachine,
    feed: Option<ChangeFeed>,
    retry_at: Option<Instant>,
    retry_delay: Duration,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

impl FeedDriver {
    async fn run(mut self, poll_interval: Duration) {
        let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.connect().await {
            loop {
                let step = tokio::select! {
                    _ = self.signals.closed() => Step::Detached,
                    _ = poll.tick() => Step::Poll,
                    received = next_change(&mut self.feed) => Step::Change(received),
                    _ = retry_timer(self.retry_at) => Step::Retry,
                };

                let keep_going = match step {
                    Step::Detached => false,
                    Step::Poll => {
                        // Without a live feed the poll is the only source of room updates.
                        let action = if self.machine.phase() == FeedPhase::Subscribed {
                            ReconcileAction::Messages
                        } else {
                            ReconcileAction::Full
                        };
                        self.emit(SignalSource::Poll, action).await
                    }
                    Step::Change(received) => self.on_change(received).await,
                    Step::Retry => {
                        self.retry_at = None;
                        self.transition(FeedEvent::RetryScheduled);
                        self.connect().await
                    }
                };
                if !keep_going {
                    break;
                }
            }
        }

        self.feed = None;
        if self.machine.phase() != FeedPhase::Closed {
            self.transition(FeedEvent::Close);
        }
        info!(room_id = %self.room_id, "room feed closed");
    }

    /// Try to open the change feed. Returns `false` when the driver must stop.
    async fn connect(&mut self) -> bool {
        match self.store.subscribe(self.room_id).await {
            Ok(feed) => {
                self.feed = Some(feed);
                self.retry_delay = self.reconnect_initial;
                self.transition(FeedEvent::Established);
                // Anything published while the feed was down is only visible through a reload.
                self.emit(SignalSource::Push, ReconcileAction::Full).await
            }
            Err(StorageError::ShutDown) => {
                info!(room_id = %self.room_id, "store shut down; not resubscribing");
                false
            }
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "change feed subscription failed");
                self.schedule_retry();
                true
            }
        }
    }

    async fn on_change(&mut self, received: Result<ChangeEvent, RecvError>) -> bool {
        match received {
            Ok(event) => {
                let Some(action) = classify(&event) else {
                    debug!(room_id = %self.room_id, table = event.table.relation(), operation = ?event.operation, "ignored change");
                    return true;
                };
                let removed = action == ReconcileAction::RoomRemoved;
                let delivered = self.emit(SignalSource::Push, action).await;
                delivered && !removed
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(room_id = %self.room_id, skipped, "change feed lagged; requesting full refresh");
                self.emit(SignalSource::Push, ReconcileAction::Full).await
            }
            Err(RecvError::Closed) => {
                warn!(room_id = %self.room_id, "change feed closed by the store");
                self.feed = None;
                self.schedule_retry();
                true
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.transition(FeedEvent::Lost);
        self.retry_at = Some(Instant::now() + self.retry_delay);
        debug!(room_id = %self.room_id, delay_ms = self.retry_delay.as_millis() as u64, "resubscribe scheduled");
        self.retry_delay = (self.retry_delay * 2).min(self.reconnect_max);
    }

    async fn emit(&self, source: SignalSource, action: ReconcileAction) -> bool {
        let signal = FeedSignal {
            room_id: self.room_id,
            source,
            action,
        };
        self.signals.send(signal).await.is_ok()
    }

    fn transition(&mut self, event: FeedEvent) {
        match self.machine.apply(event) {
            Ok(phase) => {
                self.phase.send_replace(phase);
                debug!(room_id = %self.room_id, ?phase, "feed phase changed");
            }
            Err(err) => warn!(room_id = %self.room_id, error = %err, "ignored feed transition"),
        }
    }
}

async fn next_change(feed: &mut Option<ChangeFeed>) -> Result<ChangeEvent, RecvError> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use tokio::time::timeout;
    use uuid::Uuid;

    use super::*;
    use crate::dao::{
        changes::RowPayload,
        models::{NewMessage, NewRoom, ParticipantEntity, RoomPatch, RoomType},
        room_store::MemoryRoomStore,
    };

    const WAIT: Duration = Duration::from_secs(2);

    fn config(poll_ms: u64) -> AppConfig {
        AppConfig {
            poll_interval: Duration::from_millis(poll_ms),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(80),
            ..AppConfig::default()
        }
    }

    async fn room(store: &MemoryRoomStore) -> RoomEntity {
        store
            .insert_room(NewRoom {
                code: "FEED01".into(),
                name: "Feed".into(),
                room_type: RoomType::Video,
                host_id: None,
                content_ref: None,
            })
            .await
            .unwrap()
    }

    async fn next_push(sub: &mut RoomSubscription) -> ReconcileAction {
        loop {
            let signal = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
            if signal.source == SignalSource::Push {
                return signal.action;
            }
        }
    }

    #[test]
    fn dispatch_table_routes_notifications() {
        let now = SystemTime::now();
        let room = RoomEntity {
            id: Uuid::new_v4(),
            code: "ABCDEF".into(),
            name: "Room".into(),
            room_type: RoomType::Music,
            host_id: None,
            content_ref: None,
            is_active: true,
            playback_position: 0.0,
            is_playing: false,
            created_at: now,
            updated_at: now,
        };
        let update = ChangeEvent::room(ChangeOp::Update, Some(room.clone()), Some(room.clone()));
        assert_eq!(classify(&update), Some(ReconcileAction::MergeRoom(room.clone())));

        let delete = ChangeEvent::room(ChangeOp::Delete, Some(room.clone()), None);
        assert_eq!(classify(&delete), Some(ReconcileAction::RoomRemoved));

        let insert = ChangeEvent::room(ChangeOp::Insert, None, Some(room.clone()));
        assert_eq!(classify(&insert), None);

        let left = ChangeEvent::participant(
            ChangeOp::Delete,
            room.id,
            ParticipantEntity {
                id: Uuid::new_v4(),
                room_id: room.id,
                user_id: Uuid::new_v4(),
                joined_at: now,
            },
        );
        assert!(matches!(left.old, Some(RowPayload::Participant(_))));
        assert_eq!(classify(&left), Some(ReconcileAction::Participants));
    }

    #[tokio::test]
    async fn pushes_are_classified_in_order() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        let bridge = FanoutBridge::new(Arc::new(store.clone()), &config(60_000));
        let mut sub = bridge.subscribe(room.id);

        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);
        assert_eq!(sub.phase(), FeedPhase::Subscribed);

        store
            .update_room(room.id, RoomPatch::playback(true, 7.0))
            .await
            .unwrap();
        store.insert_participant(room.id, Uuid::new_v4()).await.unwrap();
        store
            .insert_message(NewMessage {
                room_id: room.id,
                user_id: None,
                body: "hi".into(),
            })
            .await
            .unwrap();

        match next_push(&mut sub).await {
            ReconcileAction::MergeRoom(merged) => {
                assert!(merged.is_playing);
                assert_eq!(merged.playback_position, 7.0);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(next_push(&mut sub).await, ReconcileAction::Participants);
        assert_eq!(next_push(&mut sub).await, ReconcileAction::Messages);
    }

    #[tokio::test]
    async fn poll_runs_beside_the_push_channel() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        let bridge = FanoutBridge::new(Arc::new(store), &config(20));
        let mut sub = bridge.subscribe(room.id);

        let polled = timeout(WAIT, async {
            loop {
                if let Some(signal) = sub.recv().await
                    && signal.source == SignalSource::Poll
                {
                    return signal.action;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(polled, ReconcileAction::Messages);
    }

    #[tokio::test]
    async fn zero_intervals_are_clamped() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        let zeroed = AppConfig {
            poll_interval: Duration::ZERO,
            reconnect_initial: Duration::ZERO,
            reconnect_max: Duration::ZERO,
            ..AppConfig::default()
        };
        let bridge = FanoutBridge::new(Arc::new(store.clone()), &zeroed);
        let mut sub = bridge.subscribe(room.id);

        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);
        let polled = timeout(WAIT, async {
            loop {
                if let Some(signal) = sub.recv().await
                    && signal.source == SignalSource::Poll
                {
                    return signal.action;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(polled, ReconcileAction::Messages);
        sub.close().await;
        assert_eq!(store.feed_subscribers(room.id), 0);
    }

    #[tokio::test]
    async fn dropped_feed_is_reestablished_with_full_refresh() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        let bridge = FanoutBridge::new(Arc::new(store.clone()), &config(60_000));
        let mut sub = bridge.subscribe(room.id);
        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);

        store.drop_feed(room.id);

        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);
        assert_eq!(sub.phase(), FeedPhase::Subscribed);
        assert_eq!(store.feed_subscribers(room.id), 1);
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_polling() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        store.set_available(false);
        let bridge = FanoutBridge::new(Arc::new(store.clone()), &config(20));
        let mut sub = bridge.subscribe(room.id);

        let signal = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(signal.source, SignalSource::Poll);
        assert_eq!(signal.action, ReconcileAction::Full);
        assert_ne!(sub.phase(), FeedPhase::Subscribed);

        store.set_available(true);
        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);
        assert_eq!(sub.phase(), FeedPhase::Subscribed);
    }

    #[tokio::test]
    async fn room_deletion_closes_the_subscription() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        let bridge = FanoutBridge::new(Arc::new(store.clone()), &config(60_000));
        let mut sub = bridge.subscribe(room.id);
        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);

        store.delete_room(room.id).await.unwrap();

        assert_eq!(next_push(&mut sub).await, ReconcileAction::RoomRemoved);
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
        assert_eq!(sub.phase(), FeedPhase::Closed);
    }

    #[tokio::test]
    async fn close_releases_the_feed() {
        let store = MemoryRoomStore::new();
        let room = room(&store).await;
        let bridge = FanoutBridge::new(Arc::new(store.clone()), &config(60_000));
        let mut sub = bridge.subscribe(room.id);
        assert_eq!(next_push(&mut sub).await, ReconcileAction::Full);
        assert_eq!(store.feed_subscribers(room.id), 1);

        sub.close().await;

        assert_eq!(store.feed_subscribers(room.id), 0);
    }
}
