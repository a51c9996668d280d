use crate::{engine::Snapshot, Condition};
use anyhow::{anyhow, Result};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use shuffle_types::{Address, Players};

/// Messages sent to the engine.
pub enum Message {
    Reset {
        response: oneshot::Sender<()>,
    },
    Rebind {
        players: Players,
        local: Option<Address>,
        response: oneshot::Sender<Result<(), Condition>>,
    },
    Snapshot {
        response: oneshot::Sender<Snapshot>,
    },
}

/// Mailbox for the engine.
///
/// Every request is applied on the engine task in arrival order, interleaved
/// with event delivery. The engine stops once every mailbox is dropped.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(crate) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(&mut self, message: Message, receiver: oneshot::Receiver<T>) -> Result<T> {
        self.sender
            .send(message)
            .await
            .map_err(|_| anyhow!("engine stopped"))?;
        receiver.await.map_err(|_| anyhow!("engine dropped request"))
    }

    /// Start a new epoch and re-read the game status.
    pub async fn reset(&mut self) -> Result<()> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Reset { response }, receiver).await
    }

    /// Follow a different player pair or local identity in the same game.
    pub async fn rebind(&mut self, players: Players, local: Option<Address>) -> Result<()> {
        let (response, receiver) = oneshot::channel();
        let message = Message::Rebind {
            players,
            local,
            response,
        };
        self.request(message, receiver).await??;
        Ok(())
    }

    pub async fn snapshot(&mut self) -> Result<Snapshot> {
        let (response, receiver) = oneshot::channel();
        self.request(Message::Snapshot { response }, receiver).await
    }
}
