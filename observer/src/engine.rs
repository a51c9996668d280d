use crate::{
    ingress::{Mailbox, Message},
    session::{Applied, Link, Session, SessionError, ShuffleStatus, EVENTS},
    Condition,
};
use futures::{channel::mpsc, StreamExt};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use shuffle_client::{
    Action, Backoff, Dispatcher, Error as ClientError, EventBridge, EventFilter, StatusReader,
    Subscription,
};
use shuffle_types::{Address, GameId, GameStatus, Players, Role};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the application renders for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub game_id: GameId,
    pub role: Role,
    pub status: GameStatus,
    pub shuffle: ShuffleStatus,
    pub epoch: u64,
    pub link: Link,
    pub condition: Option<Condition>,
}

impl Snapshot {
    pub fn of(session: &Session, condition: Option<Condition>) -> Self {
        Self {
            game_id: session.game_id(),
            role: session.role(),
            status: session.status(),
            shuffle: session.shuffle_status(),
            epoch: session.epoch(),
            link: session.link(),
            condition,
        }
    }
}

impl From<SessionError> for Condition {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::DuplicatePlayers(_) => Condition::DuplicatePlayers,
            SessionError::Identity(_) => Condition::WalletNotConnected,
        }
    }
}

/// Identifiers a session is built from, as far as they are known.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    pub game_id: Option<GameId>,
    pub creator: Option<Address>,
    pub joiner: Option<Address>,
    pub local: Option<Address>,
}

impl SessionConfig {
    pub fn session(&self) -> Result<Session, Condition> {
        let (Some(game_id), Some(creator), Some(joiner)) = (self.game_id, self.creator, self.joiner)
        else {
            return Err(Condition::NoGameSpecified);
        };
        Ok(Session::new(game_id, Players::new(creator, joiner), self.local)?)
    }
}

/// Configuration for the engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub mailbox_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            mailbox_size: 64,
        }
    }
}

/// Why [Engine::follow] stopped.
enum Exit {
    /// Feed or status read failed; back off before resubscribing.
    Lost,
    /// The session started a new epoch and needs the chain replayed.
    Resubscribe,
    /// Every mailbox was dropped.
    Stopped,
}

/// Owns one [Session] and keeps it in sync with the chain.
///
/// All session mutation happens on the task running [Engine::run]: feed items,
/// status reads and mailbox requests are processed one at a time.
pub struct Engine<B, D> {
    bridge: B,
    dispatcher: D,
    session: Session,
    condition: Option<Condition>,
    mailbox: mpsc::Receiver<Message>,
    backoff: Backoff,
    rng: StdRng,
}

impl<B: EventBridge + StatusReader, D: Dispatcher> Engine<B, D> {
    pub fn new(config: EngineConfig, session: Session, bridge: B, dispatcher: D) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(config.mailbox_size);
        let engine = Self {
            bridge,
            dispatcher,
            session,
            condition: None,
            mailbox,
            backoff: Backoff::new(config.reconnect_min, config.reconnect_max),
            rng: StdRng::from_entropy(),
        };
        (engine, Mailbox::new(sender))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::of(&self.session, self.condition)
    }

    /// Run until every [Mailbox] is dropped.
    pub async fn run(mut self) {
        let filter = EventFilter::game(self.session.game_id()).only(EVENTS);
        loop {
            // Subscribe before reading status so nothing emitted in between is missed
            match self.bridge.subscribe(filter.clone()).await {
                Ok(mut subscription) => {
                    self.session.await_backlog();
                    if self.resync().await {
                        self.backoff.reset();
                        match self.follow(&mut subscription).await {
                            Exit::Stopped => break,
                            Exit::Resubscribe => {
                                subscription.unsubscribe();
                                continue;
                            }
                            Exit::Lost => {}
                        }
                    }
                    subscription.unsubscribe();
                }
                Err(err) => self.lost(&err),
            }

            let delay = self.backoff.next_delay(&mut self.rng);
            debug!(?delay, "waiting before resubscribing");
            if !self.pause(delay).await {
                break;
            }
        }
        info!(game_id = %self.session.game_id(), "engine stopped");
    }

    /// Process feed items and requests until the feed ends, the session needs
    /// a fresh replay, or every mailbox is dropped.
    async fn follow(&mut self, subscription: &mut Subscription) -> Exit {
        loop {
            tokio::select! {
                biased;

                item = subscription.next() => {
                    let Some(item) = item else {
                        self.lost(&ClientError::ConnectionLost("feed ended".into()));
                        return Exit::Lost;
                    };
                    match self.session.handle(item) {
                        Applied::Changed(Some(action)) => self.dispatch(action).await,
                        Applied::Reset => {
                            if !self.resync().await {
                                return Exit::Lost;
                            }
                        }
                        Applied::Disconnected => {
                            self.condition = Some(Condition::ConnectionLost);
                            return Exit::Lost;
                        }
                        _ => {}
                    }
                },
                message = self.mailbox.next() => {
                    let Some(message) = message else {
                        return Exit::Stopped;
                    };
                    if self.handle(message) {
                        debug!(game_id = %self.session.game_id(), "resubscribing for new epoch");
                        return Exit::Resubscribe;
                    }
                },
            }
        }
    }

    /// Serve requests for `delay`. Returns false if every mailbox is dropped.
    async fn pause(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                message = self.mailbox.next() => {
                    let Some(message) = message else {
                        return false;
                    };
                    self.handle(message);
                },
            }
        }
    }

    /// Apply a request. Returns true if the session started a new epoch.
    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Reset { response } => {
                self.session.reset();
                let _ = response.send(());
                true
            }
            Message::Rebind {
                players,
                local,
                response,
            } => {
                let result = self.session.rebind(players, local).map_err(Condition::from);
                let rebound = result.is_ok();
                let _ = response.send(result);
                rebound
            }
            Message::Snapshot { response } => {
                let _ = response.send(self.snapshot());
                false
            }
        }
    }

    /// Seed the session from the contract. Returns false if the read failed.
    async fn resync(&mut self) -> bool {
        let game_id = self.session.game_id();
        match self.bridge.game_status(game_id).await {
            Ok(Some(status)) => {
                self.condition = None;
                if let Some(action) = self.session.seed(status) {
                    self.dispatch(action).await;
                }
                true
            }
            Ok(None) => {
                warn!(%game_id, "game not found");
                self.condition = Some(Condition::UnknownGame { game_id });
                false
            }
            Err(err) => {
                self.lost(&err);
                false
            }
        }
    }

    fn lost(&mut self, err: &ClientError) {
        warn!(game_id = %self.session.game_id(), %err, "bridge unavailable");
        self.session.connection_lost();
        self.condition = Some(Condition::ConnectionLost);
    }

    async fn dispatch(&mut self, action: Action) {
        if let Err(err) = self.dispatcher.dispatch(action.clone()).await {
            warn!(?action, %err, "failed to dispatch action");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuffle_client::{ChannelDispatcher, MemoryBridge};
    use shuffle_types::GameEvent;
    use tokio::{sync::mpsc as tokio_mpsc, task::JoinHandle, time::timeout};

    const GAME: GameId = GameId(9);

    fn creator() -> Address {
        Address::repeat_byte(0xc1)
    }

    fn joiner() -> Address {
        Address::repeat_byte(0x01)
    }

    fn config() -> EngineConfig {
        EngineConfig {
            reconnect_min: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(40),
            mailbox_size: 8,
        }
    }

    fn start(
        bridge: &MemoryBridge,
        local: Address,
    ) -> (Mailbox, tokio_mpsc::Receiver<Action>, JoinHandle<()>) {
        start_with(config(), bridge, local)
    }

    fn start_with(
        config: EngineConfig,
        bridge: &MemoryBridge,
        local: Address,
    ) -> (Mailbox, tokio_mpsc::Receiver<Action>, JoinHandle<()>) {
        let session = SessionConfig {
            game_id: Some(GAME),
            creator: Some(creator()),
            joiner: Some(joiner()),
            local: Some(local),
        }
        .session()
        .unwrap();
        let (dispatcher, actions) = ChannelDispatcher::new(8);
        let (engine, mailbox) = Engine::new(config, session, bridge.clone(), dispatcher);
        (mailbox, actions, tokio::spawn(engine.run()))
    }

    async fn wait_for(mailbox: &mut Mailbox, check: impl Fn(&Snapshot) -> bool) -> Snapshot {
        timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = mailbox.snapshot().await.unwrap();
                if check(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("snapshot never matched")
    }

    fn shuffled(who: Address) -> GameEvent {
        GameEvent::ShuffleDeck {
            game_id: GAME,
            shuffled: who,
        }
    }

    #[test]
    fn test_session_config_conditions() {
        let mut config = SessionConfig {
            game_id: Some(GAME),
            creator: Some(creator()),
            joiner: None,
            local: Some(joiner()),
        };
        assert_eq!(config.session().err(), Some(Condition::NoGameSpecified));

        config.joiner = Some(joiner());
        config.local = None;
        assert_eq!(config.session().err(), Some(Condition::WalletNotConnected));

        config.joiner = Some(creator());
        config.local = Some(creator());
        assert_eq!(config.session().err(), Some(Condition::DuplicatePlayers));
    }

    #[tokio::test]
    async fn test_joiner_dispatches_after_creator_shuffle() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let (mut mailbox, mut actions, _engine) = start(&bridge, joiner());

        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.status, GameStatus::Shuffling);
        assert_eq!(snapshot.role, Role::Joiner);
        assert_eq!(snapshot.condition, None);

        bridge.publish(shuffled(creator()));
        bridge.publish(shuffled(creator()));
        assert_eq!(
            actions.recv().await,
            Some(Action::Shuffle {
                game_id: GAME,
                role: Role::Joiner,
            })
        );

        bridge.publish(shuffled(joiner()));
        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.status, GameStatus::InProgress);
        assert!(snapshot.shuffle.should_trigger_joiner_shuffle);

        // The duplicate never produced a second action
        assert!(actions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_creator_dispatches_on_seed() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let (_mailbox, mut actions, _engine) = start(&bridge, creator());
        assert_eq!(
            actions.recv().await,
            Some(Action::Shuffle {
                game_id: GAME,
                role: Role::Creator,
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_game_until_created() {
        let bridge = MemoryBridge::new();
        let (mut mailbox, _actions, _engine) = start(&bridge, joiner());

        let snapshot = wait_for(&mut mailbox, |s| s.condition.is_some()).await;
        assert_eq!(snapshot.condition, Some(Condition::UnknownGame { game_id: GAME }));
        assert_eq!(snapshot.status, GameStatus::Uninitialized);

        bridge.set_status(GAME, GameStatus::WaitingForJoin);
        let snapshot = wait_for(&mut mailbox, |s| s.condition.is_none()).await;
        assert_eq!(snapshot.status, GameStatus::WaitingForJoin);
    }

    #[tokio::test]
    async fn test_reconnect_resyncs_status() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let (mut mailbox, _actions, _engine) = start(&bridge, joiner());
        mailbox.snapshot().await.unwrap();
        assert_eq!(bridge.subscriber_count(), 1);

        // Game moves on while the feed is down
        bridge.set_status(GAME, GameStatus::InProgress);
        bridge.disconnect();

        let snapshot = wait_for(&mut mailbox, |s| s.status == GameStatus::InProgress).await;
        assert_eq!(snapshot.link, Link::Live);
        assert_eq!(snapshot.condition, None);
        assert_eq!(bridge.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_lost_is_reported() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let slow = EngineConfig {
            reconnect_min: Duration::from_secs(60),
            reconnect_max: Duration::from_secs(60),
            ..config()
        };
        let (mut mailbox, _actions, _engine) = start_with(slow, &bridge, joiner());
        mailbox.snapshot().await.unwrap();

        // Nothing to read back while down
        bridge.remove_game(GAME);
        bridge.disconnect();
        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.link, Link::Lost);
        assert_eq!(snapshot.condition, Some(Condition::ConnectionLost));
        assert_eq!(snapshot.status, GameStatus::Shuffling);
    }

    #[tokio::test]
    async fn test_reset_and_rematch_reseed() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let (mut mailbox, mut actions, _engine) = start(&bridge, joiner());
        mailbox.snapshot().await.unwrap();
        bridge.publish(shuffled(creator()));
        actions.recv().await.unwrap();

        // The creator's shuffle is still on chain and rebuilds the new epoch
        mailbox.reset().await.unwrap();
        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.epoch, 1);
        assert_eq!(snapshot.status, GameStatus::Shuffling);
        assert!(snapshot.shuffle.creator);
        assert!(!snapshot.shuffle.joiner);
        assert!(snapshot.shuffle.should_trigger_joiner_shuffle);
        assert_eq!(
            actions.recv().await,
            Some(Action::Shuffle {
                game_id: GAME,
                role: Role::Joiner,
            })
        );

        bridge.set_status(GAME, GameStatus::WaitingForJoin);
        bridge.publish(GameEvent::Rematch { game_id: GAME });
        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.epoch, 2);
        assert_eq!(snapshot.status, GameStatus::WaitingForJoin);
        assert_eq!(snapshot.shuffle, ShuffleStatus::default());
    }

    #[tokio::test]
    async fn test_reset_rebuilds_from_chain_without_repeating_creator() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let (mut mailbox, mut actions, _engine) = start(&bridge, creator());
        assert_eq!(
            actions.recv().await,
            Some(Action::Shuffle {
                game_id: GAME,
                role: Role::Creator,
            })
        );

        bridge.publish(shuffled(creator()));
        let snapshot = mailbox.snapshot().await.unwrap();
        assert!(snapshot.shuffle.creator);

        mailbox.reset().await.unwrap();
        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.epoch, 1);
        assert_eq!(snapshot.status, GameStatus::Shuffling);
        assert!(snapshot.shuffle.creator);
        assert_eq!(bridge.subscriber_count(), 1);

        // Already shuffled on chain, so nothing is requested again
        assert!(actions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rebind() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::Shuffling);
        let (mut mailbox, mut actions, _engine) = start(&bridge, joiner());

        let err = mailbox
            .rebind(Players::new(joiner(), joiner()), Some(joiner()))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Condition>(),
            Some(&Condition::DuplicatePlayers)
        );

        mailbox
            .rebind(Players::new(creator(), joiner()), Some(creator()))
            .await
            .unwrap();
        assert_eq!(
            actions.recv().await,
            Some(Action::Shuffle {
                game_id: GAME,
                role: Role::Creator,
            })
        );
        let snapshot = mailbox.snapshot().await.unwrap();
        assert_eq!(snapshot.role, Role::Creator);
        assert_eq!(snapshot.epoch, 1);
    }

    #[tokio::test]
    async fn test_stops_when_mailbox_dropped() {
        let bridge = MemoryBridge::new();
        bridge.set_status(GAME, GameStatus::WaitingForJoin);
        let (mut mailbox, _actions, engine) = start(&bridge, joiner());
        mailbox.snapshot().await.unwrap();

        drop(mailbox);
        timeout(Duration::from_secs(5), engine)
            .await
            .expect("engine did not stop")
            .unwrap();
        assert_eq!(bridge.subscriber_count(), 0);
    }
}
