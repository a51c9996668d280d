pub mod backoff;
pub mod bridge;
pub mod dispatcher;
pub mod evm;
pub mod memory;

pub use backoff::Backoff;
pub use bridge::{EventBridge, EventFilter, Feed, StatusReader, Subscription, SubscriptionId};
pub use dispatcher::{Action, ChannelDispatcher, Dispatcher};
pub use evm::{EvmBridge, EvmConfig};
pub use memory::MemoryBridge;

use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dispatcher closed")]
    DispatcherClosed,
    #[error(transparent)]
    Types(#[from] shuffle_types::Error),
}

impl Error {
    /// Returns true if the underlying feed is gone and state must be resynced.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionLost(_) | Error::Provider(_))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
