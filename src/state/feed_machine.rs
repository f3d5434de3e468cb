use thiserror::Error;

/// Lifecycle of one realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    /// First attempt to open the change feed.
    Connecting,
    /// Change feed open; pushes are applied incrementally.
    Subscribed,
    /// Change feed lost (or never established); only the poll is running.
    Disconnected,
    /// Retrying to open the change feed.
    Reconnecting,
    /// Torn down; no further signals.
    Closed,
}

/// Events driving the subscription state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// The store accepted the subscription.
    Established,
    /// Subscribing failed or the open feed closed.
    Lost,
    /// The reconnect backoff elapsed.
    RetryScheduled,
    /// Teardown requested.
    Close,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid feed transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidFeedTransition {
    pub from: FeedPhase,
    pub event: FeedEvent,
}

/// `Connecting → Subscribed → (Disconnected → Reconnecting → Subscribed)* → Closed`.
#[derive(Debug, Clone)]
pub struct FeedStateMachine {
    phase: FeedPhase,
    reconnect_attempts: u32,
}

impl Default for FeedStateMachine {
    fn default() -> Self {
        Self {
            phase: FeedPhase::Connecting,
            reconnect_attempts: 0,
        }
    }
}

impl FeedStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    /// Reconnect attempts since the feed was last established.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn apply(&mut self, event: FeedEvent) -> Result<FeedPhase, InvalidFeedTransition> {
        let next = match (self.phase, event) {
            (FeedPhase::Connecting | FeedPhase::Reconnecting, FeedEvent::Established) => {
                self.reconnect_attempts = 0;
                FeedPhase::Subscribed
            }
            (
                FeedPhase::Connecting | FeedPhase::Subscribed | FeedPhase::Reconnecting,
                FeedEvent::Lost,
            ) => FeedPhase::Disconnected,
            (FeedPhase::Disconnected, FeedEvent::RetryScheduled) => {
                self.reconnect_attempts += 1;
                FeedPhase::Reconnecting
            }
            (from, FeedEvent::Close) if from != FeedPhase::Closed => FeedPhase::Closed,
            (from, event) => return Err(InvalidFeedTransition { from, event }),
        };

        self.phase = next;
        Ok(next)
    }
}
