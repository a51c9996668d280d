//! Events the game contract emits about a game.
//!
//! Every event names the game it belongs to. Clients share one event stream, so
//! events for other games (or other players) are expected and must be filtered,
//! not treated as errors.

use crate::{identity::parse_address, Address, Error};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Game identifier assigned by the contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub u64);

impl FromStr for GameId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(GameId)
            .map_err(|_| Error::InvalidGameId(value.to_string()))
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an event was emitted on chain.
///
/// Positions order events within the chain, not within delivery: a feed may
/// hand them out in any order (and more than once).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub block: u64,
    pub log_index: u64,
}

impl Position {
    pub const fn new(block: u64, log_index: u64) -> Self {
        Self { block, log_index }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    GameCreated,
    GameJoined,
    ShuffleDeck,
    GameEnded,
    Rematch,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::GameCreated,
        EventKind::GameJoined,
        EventKind::ShuffleDeck,
        EventKind::GameEnded,
        EventKind::Rematch,
    ];

    /// Name of the event in the contract ABI.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::GameCreated => "GameCreated",
            EventKind::GameJoined => "GameJoined",
            EventKind::ShuffleDeck => "ShuffleDeck",
            EventKind::GameEnded => "GameEnded",
            EventKind::Rematch => "Rematch",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| Error::malformed(format!("unknown event name: {name}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    GameCreated {
        game_id: GameId,
        creator: Address,
    },
    GameJoined {
        game_id: GameId,
        joiner: Address,
    },
    /// `shuffled` finished its shuffle of the deck.
    ShuffleDeck {
        game_id: GameId,
        shuffled: Address,
    },
    GameEnded {
        game_id: GameId,
        winner: Option<Address>,
    },
    /// Players agreed to a rematch; everything learned about the previous round is stale.
    Rematch {
        game_id: GameId,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> GameId {
        match self {
            GameEvent::GameCreated { game_id, .. }
            | GameEvent::GameJoined { game_id, .. }
            | GameEvent::ShuffleDeck { game_id, .. }
            | GameEvent::GameEnded { game_id, .. }
            | GameEvent::Rematch { game_id } => *game_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::GameCreated { .. } => EventKind::GameCreated,
            GameEvent::GameJoined { .. } => EventKind::GameJoined,
            GameEvent::ShuffleDeck { .. } => EventKind::ShuffleDeck,
            GameEvent::GameEnded { .. } => EventKind::GameEnded,
            GameEvent::Rematch { .. } => EventKind::Rematch,
        }
    }
}

/// A decoded event together with its chain position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub position: Position,
    pub event: GameEvent,
}

impl Notification {
    pub fn new(position: Position, event: GameEvent) -> Self {
        Self { position, event }
    }
}

/// String form of an event, as found in recorded event files.
///
/// `game_id` is an integer rendered as a string and `address` a hex address
/// string; both are only validated by [GameEvent::try_from].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub game_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, game_id: impl Into<String>, address: Option<&str>) -> Self {
        Self {
            name: name.into(),
            game_id: game_id.into(),
            address: address.map(str::to_string),
        }
    }

    fn required_address(&self) -> Result<Address, Error> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| Error::malformed(format!("{} is missing an address", self.name)))?;
        parse_address(address).map_err(|err| Error::malformed(err.to_string()))
    }
}

impl TryFrom<&RawEvent> for GameEvent {
    type Error = Error;

    fn try_from(raw: &RawEvent) -> Result<Self, Self::Error> {
        let kind = raw.name.parse::<EventKind>()?;
        let game_id = raw
            .game_id
            .parse::<GameId>()
            .map_err(|err| Error::malformed(err.to_string()))?;
        Ok(match kind {
            EventKind::GameCreated => GameEvent::GameCreated {
                game_id,
                creator: raw.required_address()?,
            },
            EventKind::GameJoined => GameEvent::GameJoined {
                game_id,
                joiner: raw.required_address()?,
            },
            EventKind::ShuffleDeck => GameEvent::ShuffleDeck {
                game_id,
                shuffled: raw.required_address()?,
            },
            EventKind::GameEnded => GameEvent::GameEnded {
                game_id,
                winner: match raw.address.as_deref() {
                    Some(address) => Some(
                        parse_address(address).map_err(|err| Error::malformed(err.to_string()))?,
                    ),
                    None => None,
                },
            },
            EventKind::Rematch => GameEvent::Rematch { game_id },
        })
    }
}
