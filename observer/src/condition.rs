use serde::Serialize;
use shuffle_types::GameId;
use thiserror::Error;

/// Situations the application should surface to the user instead of game state.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    #[error("no game specified")]
    NoGameSpecified,
    #[error("wallet not connected")]
    WalletNotConnected,
    #[error("creator and joiner must be different players")]
    DuplicatePlayers,
    #[error("connection lost, reconnecting")]
    ConnectionLost,
    #[error("game not found")]
    UnknownGame { game_id: GameId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(Condition::NoGameSpecified.to_string(), "no game specified");
        assert_eq!(Condition::WalletNotConnected.to_string(), "wallet not connected");
        assert_eq!(
            Condition::ConnectionLost.to_string(),
            "connection lost, reconnecting"
        );
        assert_eq!(
            Condition::UnknownGame { game_id: GameId(3) }.to_string(),
            "game not found"
        );
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(Condition::UnknownGame { game_id: GameId(3) }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "condition": "unknown_game", "game_id": 3 })
        );
    }
}
