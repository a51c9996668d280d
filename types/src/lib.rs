//! Types shared by every client observing a two-player shuffle game.
//!
//! Nothing in this crate performs I/O: it defines the card domain, chain
//! addresses and roles, the game status lattice, and the events a contract
//! emits about a game.

pub mod deck;
pub mod event;
pub mod identity;
pub mod status;

pub use deck::{build_deck, Card, Rank, Suit, DECK_SIZE};
pub use event::{EventKind, GameEvent, GameId, Notification, Position, RawEvent};
pub use identity::{parse_address, resolve_role, Address, Players, Role};
pub use status::GameStatus;

use thiserror::Error;

/// Errors produced while interpreting identities, statuses, and events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no local identity is connected")]
    IdentityUnavailable,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid game id: {0}")]
    InvalidGameId(String),
    #[error("unknown game status: {0}")]
    UnknownStatus(u8),
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }
}
