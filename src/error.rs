use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::state_machine::InvalidTransition};

/// Coarse classification of a failure, letting clients choose between fixing the input,
/// retrying, or giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself is malformed.
    Validation,
    /// The room, game or membership does not exist.
    NotFound,
    /// The caller is not allowed to perform the action.
    Forbidden,
    /// The action does not fit the current state.
    Conflict,
    /// Transient failure; the same request may succeed later.
    Retryable,
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Every generated room code collided with an existing room.
    #[error("could not allocate a room code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    #[error("room `{0}` is no longer active")]
    RoomInactive(String),
    /// New members cannot join while a game is starting or running.
    #[error("a game is in progress in room `{0}`")]
    GameInProgress(String),
    #[error("room `{code}` is full ({max_players} players)")]
    RoomFull { code: String, max_players: u32 },
    #[error("reconnection window has expired")]
    ReconnectionExpired,
    #[error("reconnection credentials do not match")]
    InvalidCredentials,
    #[error("only the host can {0}")]
    NotHost(&'static str),
    #[error("at least {required} players are required (room has {present})")]
    InsufficientPlayers { required: usize, present: usize },
    #[error("room `{0}` already has an active game")]
    GameAlreadyActive(String),
    #[error("game `{0}` not found")]
    GameNotFound(String),
    #[error("game is not in progress")]
    GameNotInProgress,
    #[error("player is not a member of room `{0}`")]
    PlayerNotInRoom(String),
    #[error("player is not part of this game")]
    PlayerNotInGame,
    #[error("answer already submitted for question {0}")]
    DuplicateAnswer(u32),
    #[error("results for question {0} were already revealed")]
    QuestionAlreadyResolved(u32),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The connection has not joined a room yet.
    #[error("connection has not joined a room")]
    NotAttached,
}

impl ServiceError {
    /// Classify the error for clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidInput(_) => ErrorKind::Validation,
            ServiceError::RoomNotFound(_)
            | ServiceError::GameNotFound(_)
            | ServiceError::PlayerNotInRoom(_)
            | ServiceError::PlayerNotInGame => ErrorKind::NotFound,
            ServiceError::NotHost(_)
            | ServiceError::InvalidCredentials
            | ServiceError::ReconnectionExpired
            | ServiceError::NotAttached => ErrorKind::Forbidden,
            ServiceError::RoomInactive(_)
            | ServiceError::GameInProgress(_)
            | ServiceError::RoomFull { .. }
            | ServiceError::InsufficientPlayers { .. }
            | ServiceError::GameAlreadyActive(_)
            | ServiceError::GameNotInProgress
            | ServiceError::DuplicateAnswer(_)
            | ServiceError::QuestionAlreadyResolved(_)
            | ServiceError::InvalidTransition(_) => ErrorKind::Conflict,
            ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::CodeGenerationExhausted { .. } => ErrorKind::Retryable,
        }
    }

    /// Stable machine-readable identifier sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) => "STORAGE_UNAVAILABLE",
            ServiceError::Degraded => "DEGRADED",
            ServiceError::CodeGenerationExhausted { .. } => "CODE_GENERATION_EXHAUSTED",
            ServiceError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            ServiceError::RoomInactive(_) => "ROOM_INACTIVE",
            ServiceError::GameInProgress(_) => "GAME_IN_PROGRESS",
            ServiceError::RoomFull { .. } => "ROOM_FULL",
            ServiceError::ReconnectionExpired => "RECONNECTION_EXPIRED",
            ServiceError::InvalidCredentials => "INVALID_CREDENTIALS",
            ServiceError::NotHost(_) => "NOT_HOST",
            ServiceError::InsufficientPlayers { .. } => "INSUFFICIENT_PLAYERS",
            ServiceError::GameAlreadyActive(_) => "GAME_ALREADY_ACTIVE",
            ServiceError::GameNotFound(_) => "GAME_NOT_FOUND",
            ServiceError::GameNotInProgress => "GAME_NOT_IN_PROGRESS",
            ServiceError::PlayerNotInRoom(_) => "PLAYER_NOT_IN_ROOM",
            ServiceError::PlayerNotInGame => "PLAYER_NOT_IN_GAME",
            ServiceError::DuplicateAnswer(_) => "DUPLICATE_ANSWER",
            ServiceError::QuestionAlreadyResolved(_) => "QUESTION_ALREADY_RESOLVED",
            ServiceError::InvalidTransition(_) => "INVALID_TRANSITION",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::NotAttached => "NOT_ATTACHED",
        }
    }

    /// Message safe to show to clients. Backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Unavailable(_) => "storage temporarily unavailable".into(),
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Caller is not allowed to perform the action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.public_message();
        match err.kind() {
            ErrorKind::Validation => AppError::BadRequest(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Forbidden => AppError::Forbidden(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::Retryable => AppError::ServiceUnavailable(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
