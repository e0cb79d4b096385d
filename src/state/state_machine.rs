use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Room-level lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    /// Lobby open; players may join and toggle readiness.
    Waiting,
    /// Host requested a start; clients are loading quiz content.
    Starting,
    /// A game is running.
    InGame,
    /// Terminal: the room was closed by its host.
    Finished,
}

/// Game-level lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Created but not yet accepting answers.
    Starting,
    /// Accepting answers.
    InProgress,
    /// Temporarily halted.
    Paused,
    /// Terminal.
    Finished,
}

/// Events that move a room between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// Host asked to start a game.
    StartRequested,
    /// The game and its score ledger were created.
    GameCreated,
    /// Game creation failed after the start was announced.
    StartFailed,
    /// The running game was ended by the host.
    GameEnded,
    /// The room is being closed for everyone.
    Closed,
}

/// Events that move a game between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// First question opens.
    Begin,
    /// Host paused the game.
    Pause,
    /// Host resumed the game.
    Resume,
    /// Game is over.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// Status the entity was in when the event was received.
    pub from: String,
    /// The rejected event.
    pub event: String,
}

impl InvalidTransition {
    pub fn new(from: impl std::fmt::Debug, event: impl std::fmt::Debug) -> Self {
        Self {
            from: format!("{from:?}"),
            event: format!("{event:?}"),
        }
    }
}

/// A validated transition, applied later by a compare-and-set on the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S, E> {
    /// Status the transition was planned from; the stored value must still match.
    pub from: S,
    /// Status after applying the transition.
    pub to: S,
    /// Event that triggered this transition.
    pub event: E,
}

/// Planned transition of a room.
pub type RoomTransition = Transition<RoomStatus, RoomEvent>;
/// Planned transition of a game.
pub type GameTransition = Transition<GameStatus, GameEvent>;

impl RoomStatus {
    /// Whether the room can still be interacted with.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Finished)
    }

    /// Whether a game is being started or is running.
    pub fn has_active_game(self) -> bool {
        matches!(self, RoomStatus::Starting | RoomStatus::InGame)
    }

    /// Validate `event` against the transition table.
    pub fn plan(self, event: RoomEvent) -> Result<RoomTransition, InvalidTransition> {
        let to = match (self, event) {
            (RoomStatus::Waiting, RoomEvent::StartRequested) => RoomStatus::Starting,
            (RoomStatus::Starting, RoomEvent::GameCreated) => RoomStatus::InGame,
            (RoomStatus::Starting, RoomEvent::StartFailed) => RoomStatus::Waiting,
            (RoomStatus::InGame, RoomEvent::GameEnded) => RoomStatus::Waiting,
            (from, RoomEvent::Closed) if !from.is_terminal() => RoomStatus::Finished,
            (from, event) => return Err(InvalidTransition::new(from, event)),
        };

        Ok(Transition {
            from: self,
            to,
            event,
        })
    }
}

impl GameStatus {
    /// Whether the game still occupies its room.
    pub fn is_active(self) -> bool {
        !matches!(self, GameStatus::Finished)
    }

    /// Validate `event` against the transition table.
    pub fn plan(self, event: GameEvent) -> Result<GameTransition, InvalidTransition> {
        let to = match (self, event) {
            (GameStatus::Starting, GameEvent::Begin) => GameStatus::InProgress,
            (GameStatus::InProgress, GameEvent::Pause) => GameStatus::Paused,
            (GameStatus::Paused, GameEvent::Resume) => GameStatus::InProgress,
            (from, GameEvent::Finish) if from.is_active() => GameStatus::Finished,
            (from, event) => return Err(InvalidTransition::new(from, event)),
        };

        Ok(Transition {
            from: self,
            to,
            event,
        })
    }
}
