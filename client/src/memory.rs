//! In-process event feed.
//!
//! Used to replay recorded event files and to drive sessions in tests. Live
//! delivery is exactly what the caller publishes: duplicates, reordering, and
//! disconnects all have to be injected explicitly. Like a chain, the bridge
//! keeps every delivered notification and replays it to new subscribers.

use crate::{
    bridge::{
        EventBridge, EventFilter, Feed, StatusReader, Subscription, SubscriptionId,
        DEFAULT_CHANNEL_CAPACITY,
    },
    Error, Result,
};
use shuffle_types::{GameEvent, GameId, GameStatus, Notification, Position, RawEvent};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Subscriber {
    filter: EventFilter,
    sender: mpsc::Sender<Result<Feed>>,
}

#[derive(Default)]
struct Inner {
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    statuses: HashMap<GameId, GameStatus>,
    history: Vec<Notification>,
    next_block: u64,
}

/// Shared, cloneable in-memory bridge.
#[derive(Clone, Default)]
pub struct MemoryBridge {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the status returned by [StatusReader::game_status] for `game_id`.
    pub fn set_status(&self, game_id: GameId, status: GameStatus) {
        self.lock().statuses.insert(game_id, status);
    }

    pub fn remove_game(&self, game_id: GameId) {
        self.lock().statuses.remove(&game_id);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Publish `event` in a fresh block and return its position.
    pub fn publish(&self, event: GameEvent) -> Position {
        let position = {
            let mut inner = self.lock();
            inner.next_block += 1;
            Position::new(inner.next_block, 0)
        };
        self.deliver(Notification::new(position, event));
        position
    }

    /// Deliver a notification as-is (redeliveries and out-of-order delivery).
    pub fn deliver(&self, notification: Notification) {
        let mut inner = self.lock();
        if notification.position.block >= inner.next_block {
            inner.next_block = notification.position.block;
        }
        inner.history.push(notification.clone());
        inner.subscribers.retain(|id, subscriber| {
            if !subscriber.filter.matches(&notification.event) {
                return true;
            }
            match subscriber.sender.try_send(Ok(Feed::Event(notification.clone()))) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(?id, position = %notification.position, "subscriber full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Decode and publish a string-form event. Undecodable events reach
    /// every subscriber as [Error::MalformedEvent].
    pub fn publish_raw(&self, raw: &RawEvent) -> Option<Position> {
        match GameEvent::try_from(raw) {
            Ok(event) => Some(self.publish(event)),
            Err(err) => {
                debug!(?raw, %err, "publishing malformed event");
                self.broadcast_error(|| Error::MalformedEvent(err.to_string()));
                None
            }
        }
    }

    /// Drop the feed: every subscriber receives [Error::ConnectionLost] and
    /// its subscription ends. New subscriptions may be opened afterwards and
    /// start with the full history.
    pub fn disconnect(&self) {
        self.broadcast_error(|| Error::ConnectionLost("memory bridge disconnected".into()));
        self.lock().subscribers.clear();
    }

    fn broadcast_error(&self, error: impl Fn() -> Error) {
        let inner = self.lock();
        for subscriber in inner.subscribers.values() {
            let _ = subscriber.sender.try_send(Err(error()));
        }
    }
}

impl EventBridge for MemoryBridge {
    async fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        let id = SubscriptionId::next();
        let mut inner = self.lock();
        let backlog: Vec<_> = inner
            .history
            .iter()
            .filter(|notification| filter.matches(&notification.event))
            .cloned()
            .collect();

        // Room for the whole backlog and the marker, plus the usual live capacity
        let (sender, receiver) = mpsc::channel(backlog.len() + 1 + DEFAULT_CHANNEL_CAPACITY);
        for notification in backlog {
            let _ = sender.try_send(Ok(Feed::Event(notification)));
        }
        let _ = sender.try_send(Ok(Feed::CaughtUp));
        inner.subscribers.insert(id, Subscriber { filter, sender });
        drop(inner);
        debug!(?id, "memory subscription opened");

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, receiver, move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscribers
                    .remove(&id);
            }
        }))
    }
}

impl StatusReader for MemoryBridge {
    async fn game_status(&self, game_id: GameId) -> Result<Option<GameStatus>> {
        Ok(self.lock().statuses.get(&game_id).copied())
    }
}
