//! EVM-backed bridge: reads game status from the game contract and turns its
//! logs into a polled event feed.

use crate::{
    bridge::{
        EventBridge, EventFilter, Feed, StatusReader, Subscription, SubscriptionId,
        DEFAULT_CHANNEL_CAPACITY,
    },
    Error, Result,
};
use ethers::{
    contract::{abigen, ContractError, EthLogDecode},
    core::{
        abi::RawLog,
        types::{Filter, Log, U256},
    },
    providers::{Http, Middleware, Provider},
};
use shuffle_types::{Address, GameEvent, GameId, GameStatus, Notification, Position};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, trace, warn};

abigen!(
    ShuffleGame,
    r#"[
        event GameCreated(uint256 indexed gameId, address indexed creator)
        event GameJoined(uint256 indexed gameId, address indexed joiner)
        event ShuffleDeck(uint256 indexed gameId, address shuffledAddress)
        event GameEnded(uint256 indexed gameId, address winner)
        event Rematch(uint256 indexed gameId)
        function getGameStatus(uint256 gameId) external view returns (uint8)
        function getGame(uint256 gameId) external view returns (address creator, address joiner)
    ]"#
);

#[derive(Clone, Debug)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub contract: Address,
    /// First block scanned by every new subscription.
    pub start_block: u64,
    /// Max block range per log query.
    pub log_range: u64,
    pub poll_interval: Duration,
    pub channel_capacity: usize,
}

impl EvmConfig {
    pub fn new(rpc_url: impl Into<String>, contract: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract,
            start_block: 0,
            log_range: 2_000,
            poll_interval: Duration::from_secs(2),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Clone)]
pub struct EvmBridge {
    provider: Arc<Provider<Http>>,
    contract: ShuffleGame<Provider<Http>>,
    config: EvmConfig,
}

impl EvmBridge {
    pub fn new(config: EvmConfig) -> Result<Self> {
        let provider = Arc::new(Provider::<Http>::try_from(config.rpc_url.as_str())?);
        let contract = ShuffleGame::new(config.contract, provider.clone());
        Ok(Self {
            provider,
            contract,
            config,
        })
    }
}

fn contract_error(err: ContractError<Provider<Http>>) -> Error {
    match err {
        ContractError::MiddlewareError { e } => Error::Provider(e),
        ContractError::ProviderError { e } => Error::Provider(e),
        other => Error::Contract(other.to_string()),
    }
}

impl StatusReader for EvmBridge {
    async fn game_status(&self, game_id: GameId) -> Result<Option<GameStatus>> {
        let id = U256::from(game_id.0);
        let (creator, _) = self
            .contract
            .get_game(id)
            .call()
            .await
            .map_err(contract_error)?;
        if creator.is_zero() {
            debug!(%game_id, "game not found on chain");
            return Ok(None);
        }
        let raw = self
            .contract
            .get_game_status(id)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(Some(GameStatus::from_chain(raw)?))
    }
}

impl EventBridge for EvmBridge {
    async fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        // Fail fast if the endpoint is unreachable
        let latest = self.provider.get_block_number().await?.as_u64();

        let id = SubscriptionId::next();
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        info!(?id, latest, start_block = self.config.start_block, "polling contract logs");
        let handle = tokio::spawn(poll_logs(
            self.provider.clone(),
            self.config.clone(),
            filter,
            sender,
        ));
        Ok(Subscription::new(id, receiver, move || handle.abort()))
    }
}

async fn poll_logs(
    provider: Arc<Provider<Http>>,
    config: EvmConfig,
    selection: EventFilter,
    sender: mpsc::Sender<Result<Feed>>,
) {
    let log_range = config.log_range.max(1);
    let mut next_block = config.start_block;
    let mut caught_up = false;
    loop {
        let latest = match provider.get_block_number().await {
            Ok(latest) => latest.as_u64(),
            Err(err) => {
                warn!(%err, "failed to fetch latest block");
                let _ = sender.send(Err(Error::ConnectionLost(err.to_string()))).await;
                return;
            }
        };
        if latest < next_block {
            if !caught_up {
                caught_up = true;
                if sender.send(Ok(Feed::CaughtUp)).await.is_err() {
                    return;
                }
            }
            sleep(config.poll_interval).await;
            continue;
        }
        let to_block = latest.min(next_block.saturating_add(log_range - 1));

        let mut query = Filter::new()
            .address(config.contract)
            .from_block(next_block)
            .to_block(to_block);
        if let Some(game_id) = selection.game_id {
            query = query.topic1(U256::from(game_id.0));
        }
        let mut logs = match provider.get_logs(&query).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(%err, from = next_block, to = to_block, "failed to fetch logs");
                let _ = sender.send(Err(Error::ConnectionLost(err.to_string()))).await;
                return;
            }
        };
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        trace!(from = next_block, to = to_block, count = logs.len(), "fetched logs");

        for log in logs {
            let item = decode_log(log);
            match &item {
                Ok(notification) if !selection.matches(&notification.event) => continue,
                Ok(_) => {}
                Err(err) => warn!(%err, "undecodable contract log"),
            }
            if sender.send(item.map(Feed::Event)).await.is_err() {
                return; // Receiver dropped
            }
        }

        next_block = to_block.saturating_add(1);
        if to_block == latest {
            if !caught_up {
                caught_up = true;
                debug!(block = latest, "backlog delivered");
                if sender.send(Ok(Feed::CaughtUp)).await.is_err() {
                    return;
                }
            }
            sleep(config.poll_interval).await;
        }
    }
}

/// Decode one contract log. Each log is decoded on its own so a bad log never
/// hides its neighbours.
pub(crate) fn decode_log(log: Log) -> Result<Notification> {
    let position = match (log.block_number, log.log_index) {
        (Some(block), Some(index)) => Position::new(block.as_u64(), index.low_u64()),
        _ => return Err(Error::MalformedEvent("log is still pending".into())),
    };
    let event = ShuffleGameEvents::decode_log(&RawLog::from(log))
        .map_err(|err| Error::MalformedEvent(format!("{err} at {position}")))?;
    Ok(Notification::new(position, to_game_event(event)?))
}

fn to_game_event(event: ShuffleGameEvents) -> Result<GameEvent> {
    let game = |id: U256| {
        u64::try_from(id)
            .map(GameId)
            .map_err(|_| Error::MalformedEvent(format!("game id {id} out of range")))
    };
    Ok(match event {
        ShuffleGameEvents::GameCreatedFilter(event) => GameEvent::GameCreated {
            game_id: game(event.game_id)?,
            creator: event.creator,
        },
        ShuffleGameEvents::GameJoinedFilter(event) => GameEvent::GameJoined {
            game_id: game(event.game_id)?,
            joiner: event.joiner,
        },
        ShuffleGameEvents::ShuffleDeckFilter(event) => GameEvent::ShuffleDeck {
            game_id: game(event.game_id)?,
            shuffled: event.shuffled_address,
        },
        ShuffleGameEvents::GameEndedFilter(event) => GameEvent::GameEnded {
            game_id: game(event.game_id)?,
            winner: (!event.winner.is_zero()).then_some(event.winner),
        },
        ShuffleGameEvents::RematchFilter(event) => GameEvent::Rematch {
            game_id: game(event.game_id)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::{
        abi::{encode, Token},
        contract::EthEvent,
        core::types::{H256, U64},
    };

    fn game_topic(id: u64) -> H256 {
        H256::from_low_u64_be(id)
    }

    fn shuffle_log(game_id: u64, shuffled: Address, block: u64, index: u64) -> Log {
        Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![ShuffleDeckFilter::signature(), game_topic(game_id)],
            data: encode(&[Token::Address(shuffled)]).into(),
            block_number: Some(U64::from(block)),
            log_index: Some(U256::from(index)),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_shuffle_deck_log() {
        let shuffled = Address::repeat_byte(0x01);
        let notification = decode_log(shuffle_log(7, shuffled, 100, 3)).unwrap();
        assert_eq!(notification.position, Position::new(100, 3));
        assert_eq!(
            notification.event,
            GameEvent::ShuffleDeck {
                game_id: GameId(7),
                shuffled,
            }
        );
    }

    #[test]
    fn test_decode_game_ended_zero_winner() {
        let log = Log {
            topics: vec![GameEndedFilter::signature(), game_topic(2)],
            data: encode(&[Token::Address(Address::zero())]).into(),
            block_number: Some(U64::from(5)),
            log_index: Some(U256::zero()),
            ..Default::default()
        };
        assert_eq!(
            decode_log(log).unwrap().event,
            GameEvent::GameEnded {
                game_id: GameId(2),
                winner: None,
            }
        );
    }

    #[test]
    fn test_decode_pending_log_is_malformed() {
        let mut log = shuffle_log(7, Address::repeat_byte(0x01), 100, 3);
        log.block_number = None;
        assert!(matches!(decode_log(log), Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_decode_unknown_topic_is_malformed() {
        let mut log = shuffle_log(7, Address::repeat_byte(0x01), 100, 3);
        log.topics[0] = H256::repeat_byte(0x99);
        assert!(matches!(decode_log(log), Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_decode_oversized_game_id_is_malformed() {
        let mut log = shuffle_log(7, Address::repeat_byte(0x01), 100, 3);
        log.topics[1] = H256::repeat_byte(0xff);
        assert!(matches!(decode_log(log), Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = EvmConfig::new("not a url", Address::zero());
        assert!(matches!(EvmBridge::new(config), Err(Error::Url(_))));
    }
}
