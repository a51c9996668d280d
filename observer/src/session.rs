//! Per-client state machine for one game.
//!
//! A [Session] owns the game status and shuffle progress the local client
//! derives from chain reads and events. Events may be duplicated or delivered
//! out of order, so every mutation is idempotent: flags are set (never
//! toggled), status only moves forward, and each "act now" decision is latched
//! so it fires at most once per epoch.
//!
//! While a fresh subscription is still replaying what is already on chain,
//! actions are held back: the local player's own shuffle may be in that
//! backlog.

use serde::Serialize;
use shuffle_client::{Action, Error as ClientError, Feed};
use shuffle_types::{
    Address, EventKind, GameEvent, GameId, GameStatus, Notification, Players, Position, Role,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("creator and joiner are the same address: {0:#x}")]
    DuplicatePlayers(Address),
    #[error(transparent)]
    Identity(#[from] shuffle_types::Error),
}

/// Which players have shuffled during the current epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShuffleProgress {
    pub creator: bool,
    pub joiner: bool,
}

impl ShuffleProgress {
    pub fn complete(&self) -> bool {
        self.creator && self.joiner
    }
}

/// Read-only shuffle view handed to the application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShuffleStatus {
    pub creator: bool,
    pub joiner: bool,
    pub should_trigger_joiner_shuffle: bool,
}

/// Health of the event feed behind the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    #[default]
    Live,
    /// Last-known state is kept but may be stale until the next [Session::seed].
    Lost,
}

/// Why a notification left the session untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filtered {
    OtherGame,
    /// Emitted before the latest rematch.
    Stale,
    /// Names an address that is not one of the two players.
    UnknownPlayer,
}

/// Result of handing one feed item to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// State changed; `Some` when the local player should now act.
    Changed(Option<Action>),
    /// A valid event that was already reflected in the state.
    Unchanged,
    Filtered(Filtered),
    /// A rematch began a new epoch; status must be re-read.
    Reset,
    /// Undecodable item, dropped.
    Malformed,
    /// The feed is gone; status must be re-read after reconnecting.
    Disconnected,
}

impl Applied {
    pub fn action(&self) -> Option<&Action> {
        match self {
            Applied::Changed(action) => action.as_ref(),
            _ => None,
        }
    }
}

/// Events a session consumes.
pub const EVENTS: [EventKind; 5] = EventKind::ALL;

pub struct Session {
    game_id: GameId,
    players: Players,
    role: Role,

    status: GameStatus,
    progress: ShuffleProgress,
    // Latest position of each player's shuffle in this epoch
    creator_shuffled_at: Option<Position>,
    joiner_shuffled_at: Option<Position>,
    joiner_trigger: bool,
    creator_trigger: bool,

    epoch: u64,
    floor: Option<Position>,
    backlog: bool,
    link: Link,
}

impl Session {
    pub fn new(
        game_id: GameId,
        players: Players,
        local: Option<Address>,
    ) -> Result<Self, SessionError> {
        let role = Self::bind(&players, local.as_ref())?;
        info!(%game_id, ?role, ?local, "session created");
        Ok(Self {
            game_id,
            players,
            role,
            status: GameStatus::Uninitialized,
            progress: ShuffleProgress::default(),
            creator_shuffled_at: None,
            joiner_shuffled_at: None,
            joiner_trigger: false,
            creator_trigger: false,
            epoch: 0,
            floor: None,
            backlog: false,
            link: Link::Live,
        })
    }

    fn bind(players: &Players, local: Option<&Address>) -> Result<Role, SessionError> {
        if players.creator == players.joiner {
            return Err(SessionError::DuplicatePlayers(players.creator));
        }
        Ok(players.role_of(local)?)
    }

    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn progress(&self) -> ShuffleProgress {
        self.progress
    }

    pub fn shuffle_status(&self) -> ShuffleStatus {
        ShuffleStatus {
            creator: self.progress.creator,
            joiner: self.progress.joiner,
            should_trigger_joiner_shuffle: self.joiner_trigger,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn link(&self) -> Link {
        self.link
    }

    /// Whether `role` should submit its shuffle given what is known now.
    ///
    /// The creator shuffles first once the game is shuffling; the joiner
    /// follows as soon as the creator's shuffle is on chain.
    pub fn should_act(&self, role: Role) -> bool {
        match role {
            Role::Creator => self.status == GameStatus::Shuffling && !self.progress.creator,
            Role::Joiner => self.progress.creator && !self.progress.joiner,
            Role::Spectator => false,
        }
    }

    /// Adopt the status read from the contract (initial read or resync).
    pub fn seed(&mut self, status: GameStatus) -> Option<Action> {
        if !status.is_initialized() {
            warn!(game_id = %self.game_id, "ignoring uninitialized seed status");
            return None;
        }
        if self.status != status {
            info!(game_id = %self.game_id, from = %self.status, to = %status, epoch = self.epoch, "status seeded");
        }
        self.status = status;
        self.link = Link::Live;
        self.settle();
        self.take_action()
    }

    /// Record that the feed dropped. State is kept as-is.
    pub fn connection_lost(&mut self) {
        if self.link == Link::Live {
            warn!(game_id = %self.game_id, status = %self.status, "connection lost");
        }
        self.link = Link::Lost;
    }

    /// A new subscription is about to replay the chain. Actions are held
    /// until [Feed::CaughtUp] arrives.
    pub fn await_backlog(&mut self) {
        self.backlog = true;
    }

    /// The backlog has been delivered; release any held action.
    pub fn caught_up(&mut self) -> Option<Action> {
        if self.backlog {
            debug!(game_id = %self.game_id, "caught up with chain");
        }
        self.backlog = false;
        self.take_action()
    }

    /// Forget everything learned in this epoch and start a new one.
    pub fn reset(&mut self) {
        self.status = GameStatus::Uninitialized;
        self.progress = ShuffleProgress::default();
        self.creator_shuffled_at = None;
        self.joiner_shuffled_at = None;
        self.joiner_trigger = false;
        self.creator_trigger = false;
        self.epoch += 1;
        info!(game_id = %self.game_id, epoch = self.epoch, "session reset");
    }

    /// Switch to a new player pair or local identity. Always starts a new epoch.
    pub fn rebind(&mut self, players: Players, local: Option<Address>) -> Result<(), SessionError> {
        let role = Self::bind(&players, local.as_ref())?;
        self.players = players;
        self.role = role;
        self.reset();
        info!(game_id = %self.game_id, ?role, "session rebound");
        Ok(())
    }

    /// Handle one item from the event feed.
    pub fn handle(&mut self, item: Result<Feed, ClientError>) -> Applied {
        match item {
            Ok(Feed::Event(notification)) => self.apply(&notification),
            Ok(Feed::CaughtUp) => match self.caught_up() {
                Some(action) => Applied::Changed(Some(action)),
                None => Applied::Unchanged,
            },
            Err(err) if err.is_connection_lost() => {
                self.connection_lost();
                Applied::Disconnected
            }
            Err(err) => {
                warn!(game_id = %self.game_id, %err, "dropping malformed event");
                Applied::Malformed
            }
        }
    }

    pub fn apply(&mut self, notification: &Notification) -> Applied {
        let Notification { position, event } = notification;
        if event.game_id() != self.game_id {
            return Applied::Filtered(Filtered::OtherGame);
        }
        if self.floor.is_some_and(|floor| *position <= floor) {
            debug!(game_id = %self.game_id, %position, "dropping event from previous epoch");
            return Applied::Filtered(Filtered::Stale);
        }

        let before = (self.status, self.progress);
        match event {
            GameEvent::ShuffleDeck { shuffled, .. } => {
                if !self.players.contains(shuffled) {
                    return self.unknown_player(event);
                }
                self.record_shuffle(*shuffled, *position);
                self.settle();
            }
            GameEvent::GameCreated { creator, .. } => {
                if *creator != self.players.creator {
                    return self.unknown_player(event);
                }
                self.advance(GameStatus::WaitingForJoin);
            }
            GameEvent::GameJoined { joiner, .. } => {
                if *joiner != self.players.joiner {
                    return self.unknown_player(event);
                }
                if self.advance(GameStatus::Shuffling) {
                    self.settle();
                }
            }
            GameEvent::GameEnded { winner, .. } => {
                if self.advance(GameStatus::Finished) {
                    info!(game_id = %self.game_id, ?winner, "game finished");
                }
            }
            GameEvent::Rematch { .. } => {
                // Shuffles after the rematch belong to the new epoch
                let carried = [
                    (self.players.creator, self.creator_shuffled_at),
                    (self.players.joiner, self.joiner_shuffled_at),
                ];
                self.floor = Some(*position);
                self.reset();
                for (player, at) in carried {
                    if let Some(at) = at.filter(|at| at > position) {
                        self.record_shuffle(player, at);
                    }
                }
                return Applied::Reset;
            }
        }

        let action = self.take_action();
        if before == (self.status, self.progress) && action.is_none() {
            Applied::Unchanged
        } else {
            Applied::Changed(action)
        }
    }

    fn record_shuffle(&mut self, player: Address, position: Position) {
        let (flag, at) = if player == self.players.creator {
            (&mut self.progress.creator, &mut self.creator_shuffled_at)
        } else {
            (&mut self.progress.joiner, &mut self.joiner_shuffled_at)
        };
        *flag = true;
        *at = (*at).max(Some(position));
    }

    fn unknown_player(&self, event: &GameEvent) -> Applied {
        debug!(game_id = %self.game_id, ?event, "event names an unknown player");
        Applied::Filtered(Filtered::UnknownPlayer)
    }

    /// Move forward to `target`. Never moves backwards and never leaves
    /// `Uninitialized` (only a seed does that).
    fn advance(&mut self, target: GameStatus) -> bool {
        if !self.status.is_initialized() || self.status >= target {
            return false;
        }
        info!(game_id = %self.game_id, from = %self.status, to = %target, "status advanced");
        self.status = target;
        true
    }

    /// Both shuffles on chain means the game is in progress.
    fn settle(&mut self) {
        if self.progress.complete() && self.status < GameStatus::InProgress {
            self.advance(GameStatus::InProgress);
        }
    }

    /// Rising edge of `should_act` for the local role, latched per epoch.
    fn take_action(&mut self) -> Option<Action> {
        if self.backlog || self.status.is_terminal() || !self.should_act(self.role) {
            return None;
        }
        let latch = match self.role {
            Role::Creator => &mut self.creator_trigger,
            Role::Joiner => &mut self.joiner_trigger,
            Role::Spectator => return None,
        };
        if *latch {
            return None;
        }
        *latch = true;
        info!(game_id = %self.game_id, role = ?self.role, epoch = self.epoch, "local shuffle requested");
        Some(Action::Shuffle {
            game_id: self.game_id,
            role: self.role,
        })
    }
}
