//! Boundary between a session and the chain it observes.
//!
//! Feeds are assumed to deliver at least once while subscribed, in no particular
//! order across transactions, and not at all while disconnected. Consumers must
//! be correct under exactly those guarantees.
//!
//! Every new subscription first replays what is already on chain and then
//! emits [Feed::CaughtUp] once, before any live events.

use crate::Result;
use futures_util::Stream as FutStream;
use shuffle_types::{EventKind, GameEvent, GameId, GameStatus, Notification};
use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// One item delivered by a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Feed {
    Event(Notification),
    /// Everything on chain when the subscription was opened has been delivered.
    CaughtUp,
}

/// Selects which events a subscription receives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events for this game (all games if `None`).
    pub game_id: Option<GameId>,
    /// Only these kinds (all kinds if empty).
    pub kinds: Vec<EventKind>,
}

impl EventFilter {
    /// Every event for one game.
    pub fn game(game_id: GameId) -> Self {
        Self {
            game_id: Some(game_id),
            kinds: Vec::new(),
        }
    }

    /// Restrict to the given event kinds.
    pub fn only(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn matches(&self, event: &GameEvent) -> bool {
        if let Some(game_id) = self.game_id {
            if event.game_id() != game_id {
                return false;
            }
        }
        self.kinds.is_empty() || self.kinds.contains(&event.kind())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Owned handle to a live feed.
///
/// The feed is released when the handle is dropped or [Subscription::unsubscribe]
/// is called, whichever happens first, so a session cannot leak handlers across
/// reconnects. Items are `Err` for undecodable events (the feed continues) and
/// for a lost connection (the feed ends).
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Result<Feed>>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: mpsc::Receiver<Result<Feed>>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving events. Anything already queued is discarded.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            debug!(id = ?self.id, "releasing subscription");
            self.receiver.close();
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl FutStream for Subscription {
    type Item = Result<Feed>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Source of game events.
pub trait EventBridge: Send + Sync {
    fn subscribe(&self, filter: EventFilter) -> impl Future<Output = Result<Subscription>> + Send;
}

/// Reads the authoritative status of a game.
pub trait StatusReader: Send + Sync {
    /// Returns `None` if the contract has no such game.
    fn game_status(
        &self,
        game_id: GameId,
    ) -> impl Future<Output = Result<Option<GameStatus>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuffle_types::Address;

    #[test]
    fn test_filter_matches() {
        let shuffle = GameEvent::ShuffleDeck {
            game_id: GameId(1),
            shuffled: Address::repeat_byte(1),
        };
        let joined = GameEvent::GameJoined {
            game_id: GameId(1),
            joiner: Address::repeat_byte(2),
        };
        let other_game = GameEvent::Rematch { game_id: GameId(2) };

        let all = EventFilter::default();
        assert!(all.matches(&shuffle) && all.matches(&other_game));

        let game = EventFilter::game(GameId(1));
        assert!(game.matches(&shuffle));
        assert!(game.matches(&joined));
        assert!(!game.matches(&other_game));

        let shuffles = EventFilter::game(GameId(1)).only([EventKind::ShuffleDeck]);
        assert!(shuffles.matches(&shuffle));
        assert!(!shuffles.matches(&joined));
    }

    #[tokio::test]
    async fn test_subscription_release_runs_once() {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(1);
        let subscription = Subscription::new(SubscriptionId::next(), rx, {
            let released = released.clone();
            move || {
                released.fetch_add(1, Ordering::SeqCst);
            }
        });
        subscription.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.is_closed());
    }
}
