use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GameEntity, PlayerEntity, RoomEntity, ScoreEntity},
    dto::format_system_time,
    state::state_machine::{GameStatus, RoomStatus},
};

/// Payload used to open a new room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// External identity of the host, as supplied by the identity provider.
    #[validate(length(min = 1, max = 128))]
    pub host_identity: String,
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
    #[validate(url)]
    pub avatar_url: Option<String>,
    /// Defaults to the configured capacity.
    #[validate(range(min = 1, max = 100))]
    pub max_players: Option<u32>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub settings: serde_json::Value,
}

/// Payload used to join an existing room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[validate(length(min = 1, max = 128))]
    pub identity: String,
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
    #[validate(url)]
    pub avatar_url: Option<String>,
}

/// Music preferences contributed by a member.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShareMusicRequest {
    #[validate(length(min = 1, max = 128))]
    pub identity: String,
    #[schema(value_type = Object)]
    pub music_data: serde_json::Value,
}

/// Identifies the member performing an action on a room or game.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRequest {
    #[validate(length(min = 1, max = 128))]
    pub identity: String,
}

/// Public view of a membership.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: Uuid,
    pub identity: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub is_ready: bool,
    pub has_music_data: bool,
    pub joined_at: String,
}

impl From<&PlayerEntity> for PlayerView {
    fn from(value: &PlayerEntity) -> Self {
        Self {
            id: value.id,
            identity: value.identity.clone(),
            display_name: value.display_name.clone(),
            avatar_url: value.avatar_url.clone(),
            is_host: value.is_host,
            is_ready: value.is_ready,
            has_music_data: value.music_data.is_some(),
            joined_at: format_system_time(value.joined_at),
        }
    }
}

/// Summary of a game.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub id: Uuid,
    pub status: GameStatus,
    pub total_questions: u32,
    pub current_question: u32,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl From<&GameEntity> for GameView {
    fn from(value: &GameEntity) -> Self {
        Self {
            id: value.id,
            status: value.status,
            total_questions: value.total_questions,
            current_question: value.current_question,
            started_at: format_system_time(value.started_at),
            ended_at: value.ended_at.map(format_system_time),
        }
    }
}

/// Full room snapshot sent on join and returned by `GET /rooms/{code}`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub host_identity: String,
    pub status: RoomStatus,
    pub max_players: u32,
    pub active: bool,
    #[schema(value_type = Object)]
    pub settings: serde_json::Value,
    /// Members in join order.
    pub players: Vec<PlayerView>,
    pub active_game: Option<GameView>,
    pub created_at: String,
    pub updated_at: String,
}

impl RoomSnapshot {
    pub fn new(room: &RoomEntity, players: &[PlayerEntity], active_game: Option<&GameEntity>) -> Self {
        Self {
            code: room.code.clone(),
            host_identity: room.host_identity.clone(),
            status: room.status,
            max_players: room.max_players,
            active: room.active,
            settings: room.settings.clone(),
            players: players.iter().map(PlayerView::from).collect(),
            active_game: active_game.map(GameView::from),
            created_at: format_system_time(room.created_at),
            updated_at: format_system_time(room.updated_at),
        }
    }
}

/// Response to a successful room creation.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub code: String,
    pub host: PlayerView,
    pub room: RoomSnapshot,
}

/// Response to a join request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub player: PlayerView,
    /// The identity already had a membership; nothing was created.
    pub rejoined: bool,
    /// Set on a rejoin while a game is starting or running.
    pub rejoined_game_in_progress: bool,
}

/// Response to a leave request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomResponse {
    /// The host left and the room was closed for everyone.
    pub room_closed: bool,
}

/// Leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreView {
    pub player_id: Uuid,
    pub identity: String,
    pub display_name: String,
    pub total_score: i64,
    pub correct_answers: u32,
    pub total_answers: u32,
    pub average_response_time: f64,
}

impl From<&ScoreEntity> for ScoreView {
    fn from(value: &ScoreEntity) -> Self {
        Self {
            player_id: value.player_id,
            identity: value.identity.clone(),
            display_name: value.display_name.clone(),
            total_score: value.total_score,
            correct_answers: value.correct_answers,
            total_answers: value.total_answers,
            average_response_time: value.average_response_time_ms(),
        }
    }
}

/// Aggregates reported when a game ends.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub total_questions: u32,
    pub questions_played: u32,
    pub total_answers: u64,
    pub correct_answers: u64,
    pub duration_ms: u64,
}

/// Final standings returned by `POST /games/{id}/end`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameFinishedResponse {
    pub game_id: Uuid,
    pub final_scores: Vec<ScoreView>,
    pub game_stats: GameStats,
}
