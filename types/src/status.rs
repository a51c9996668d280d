use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a game as seen by one client.
///
/// Variants are declared in protocol order, so `a < b` means `b` is further
/// along than `a`. [GameStatus::Uninitialized] is local only: the contract
/// never reports it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    #[default]
    Uninitialized,
    WaitingForStart,
    WaitingForJoin,
    Shuffling,
    InProgress,
    Finished,
}

impl GameStatus {
    /// Decode the `uint8` status stored by the game contract.
    pub fn from_chain(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::WaitingForStart),
            1 => Ok(Self::WaitingForJoin),
            2 => Ok(Self::Shuffling),
            3 => Ok(Self::InProgress),
            4 => Ok(Self::Finished),
            other => Err(Error::UnknownStatus(other)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self != Self::Uninitialized
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Finished
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::WaitingForStart => "WAITING_FOR_START",
            Self::WaitingForJoin => "WAITING_FOR_JOIN",
            Self::Shuffling => "SHUFFLING",
            Self::InProgress => "IN_PROGRESS",
            Self::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_chain() {
        assert_eq!(GameStatus::from_chain(0), Ok(GameStatus::WaitingForStart));
        assert_eq!(GameStatus::from_chain(2), Ok(GameStatus::Shuffling));
        assert_eq!(GameStatus::from_chain(4), Ok(GameStatus::Finished));
        assert_eq!(GameStatus::from_chain(5), Err(Error::UnknownStatus(5)));
    }

    #[test]
    fn test_protocol_order() {
        assert!(GameStatus::Uninitialized < GameStatus::WaitingForStart);
        assert!(GameStatus::WaitingForJoin < GameStatus::Shuffling);
        assert!(GameStatus::Shuffling < GameStatus::InProgress);
        assert!(GameStatus::InProgress < GameStatus::Finished);
    }

    #[test]
    fn test_serde_names_match_display() {
        for status in [
            GameStatus::Uninitialized,
            GameStatus::WaitingForJoin,
            GameStatus::InProgress,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
