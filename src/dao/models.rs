use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::state_machine::{GameStatus, RoomStatus};

/// Lobby grouping players for one match, keyed by its short code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomEntity {
    /// Four uppercase letters, unique across all stored rooms.
    pub code: String,
    /// External identity of the room creator.
    pub host_identity: String,
    pub status: RoomStatus,
    pub max_players: u32,
    /// Cleared when the host leaves; the row stays until expiry.
    pub active: bool,
    /// Free-form settings supplied at creation.
    pub settings: serde_json::Value,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// A player's membership in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerEntity {
    /// Membership identifier.
    pub id: Uuid,
    pub room_code: String,
    /// Stable identifier supplied by the identity provider.
    pub identity: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub is_ready: bool,
    pub reconnection_token: Option<String>,
    pub device_id: Option<String>,
    /// Music preferences shared by the player, absent until contributed.
    pub music_data: Option<serde_json::Value>,
    pub joined_at: SystemTime,
    pub last_active_at: SystemTime,
}

/// Partial update applied to a membership row. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerUpdate {
    pub is_ready: Option<bool>,
    pub reconnection_token: Option<String>,
    pub device_id: Option<String>,
    pub music_data: Option<serde_json::Value>,
    pub last_active_at: Option<SystemTime>,
}

impl PlayerUpdate {
    /// Apply the update onto an in-memory row.
    pub fn apply_to(&self, player: &mut PlayerEntity) {
        if let Some(ready) = self.is_ready {
            player.is_ready = ready;
        }
        if let Some(token) = &self.reconnection_token {
            player.reconnection_token = Some(token.clone());
        }
        if let Some(device) = &self.device_id {
            player.device_id = Some(device.clone());
        }
        if let Some(data) = &self.music_data {
            player.music_data = Some(data.clone());
        }
        if let Some(at) = self.last_active_at {
            player.last_active_at = at;
        }
    }
}

/// One playthrough within a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEntity {
    pub id: Uuid,
    pub room_code: String,
    pub status: GameStatus,
    pub total_questions: u32,
    /// Lowest question number (1-based) whose results have not been revealed.
    pub current_question: u32,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
}

/// Running tally for one player in one game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreEntity {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub identity: String,
    pub display_name: String,
    pub total_score: i64,
    pub correct_answers: u32,
    pub total_answers: u32,
    /// Sum of response times of scored answers; the average is derived from it.
    pub response_time_total_ms: u64,
}

impl ScoreEntity {
    /// Zeroed ledger row for a room member at game start.
    pub fn zeroed(game_id: Uuid, player: &PlayerEntity) -> Self {
        Self {
            game_id,
            player_id: player.id,
            identity: player.identity.clone(),
            display_name: player.display_name.clone(),
            total_score: 0,
            correct_answers: 0,
            total_answers: 0,
            response_time_total_ms: 0,
        }
    }

    /// Mean response time across scored answers, in milliseconds.
    pub fn average_response_time_ms(&self) -> f64 {
        if self.total_answers == 0 {
            0.0
        } else {
            self.response_time_total_ms as f64 / f64::from(self.total_answers)
        }
    }
}

/// Additive change applied atomically to a score row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreDelta {
    pub points: i64,
    pub correct_answers: u32,
    pub total_answers: u32,
    pub response_time_ms: u64,
}

/// A single answer of one player to one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerEntity {
    pub id: Uuid,
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub question_number: u32,
    pub selected_answer: u32,
    /// Unknown until the host reveals the correct answer.
    pub is_correct: Option<bool>,
    pub response_time_ms: u64,
    pub submitted_at: SystemTime,
}
