use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use shuffle_types::{GameId, Role};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::debug;

/// A contract call the local player should submit.
///
/// Outcomes are never reported synchronously: a successful shuffle shows up
/// later as a `ShuffleDeck` event naming the submitting player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Shuffle { game_id: GameId, role: Role },
}

/// Submits actions on behalf of the local player.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, action: Action) -> impl Future<Output = Result<()>> + Send;
}

/// Hands actions to the host application over a channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<Action>,
}

impl ChannelDispatcher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Action>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl Dispatcher for ChannelDispatcher {
    async fn dispatch(&self, action: Action) -> Result<()> {
        debug!(?action, "dispatching action");
        self.sender
            .send(action)
            .await
            .map_err(|_| Error::DispatcherClosed)
    }
}
