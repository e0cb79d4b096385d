//! BSON document shapes. Identifiers are stored as hyphenated strings, timestamps as BSON
//! dates and free-form JSON payloads as serialized strings.

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, GameEntity, PlayerEntity, PlayerUpdate, RoomEntity, ScoreEntity},
    state::state_machine::{GameStatus, RoomStatus},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    code: String,
    host_identity: String,
    status: RoomStatus,
    max_players: i64,
    active: bool,
    settings: String,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            code: value.code,
            host_identity: value.host_identity,
            status: value.status,
            max_players: i64::from(value.max_players),
            active: value.active,
            settings: value.settings.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoRoomDocument> for RoomEntity {
    fn from(value: MongoRoomDocument) -> Self {
        Self {
            code: value.code,
            host_identity: value.host_identity,
            status: value.status,
            max_players: to_u32(value.max_players),
            active: value.active,
            settings: parse_json(&value.settings).unwrap_or_default(),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    room_code: String,
    identity: String,
    display_name: String,
    avatar_url: Option<String>,
    is_host: bool,
    is_ready: bool,
    reconnection_token: Option<String>,
    device_id: Option<String>,
    music_data: Option<String>,
    joined_at: DateTime,
    last_active_at: DateTime,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            room_code: value.room_code,
            identity: value.identity,
            display_name: value.display_name,
            avatar_url: value.avatar_url,
            is_host: value.is_host,
            is_ready: value.is_ready,
            reconnection_token: value.reconnection_token,
            device_id: value.device_id,
            music_data: value.music_data.map(|data| data.to_string()),
            joined_at: DateTime::from_system_time(value.joined_at),
            last_active_at: DateTime::from_system_time(value.last_active_at),
        }
    }
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        Self {
            id: parse_uuid(&value.id),
            room_code: value.room_code,
            identity: value.identity,
            display_name: value.display_name,
            avatar_url: value.avatar_url,
            is_host: value.is_host,
            is_ready: value.is_ready,
            reconnection_token: value.reconnection_token,
            device_id: value.device_id,
            music_data: value.music_data.as_deref().and_then(parse_json),
            joined_at: value.joined_at.to_system_time(),
            last_active_at: value.last_active_at.to_system_time(),
        }
    }
}

/// Translate a [`PlayerUpdate`] into a `$set` document. Returns `None` when nothing changes.
pub fn player_update_document(update: &PlayerUpdate) -> Option<Document> {
    let mut set = Document::new();
    if let Some(ready) = update.is_ready {
        set.insert("is_ready", ready);
    }
    if let Some(token) = &update.reconnection_token {
        set.insert("reconnection_token", token.clone());
    }
    if let Some(device) = &update.device_id {
        set.insert("device_id", device.clone());
    }
    if let Some(data) = &update.music_data {
        set.insert("music_data", data.to_string());
    }
    if let Some(at) = update.last_active_at {
        set.insert("last_active_at", DateTime::from_system_time(at));
    }

    (!set.is_empty()).then(|| doc! { "$set": set })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: String,
    room_code: String,
    status: GameStatus,
    /// Mirrors `status != FINISHED`; backs the partial unique index on `room_code`.
    active: bool,
    total_questions: i64,
    current_question: i64,
    started_at: DateTime,
    ended_at: Option<DateTime>,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id.to_string(),
            room_code: value.room_code,
            active: value.status.is_active(),
            status: value.status,
            total_questions: i64::from(value.total_questions),
            current_question: i64::from(value.current_question),
            started_at: DateTime::from_system_time(value.started_at),
            ended_at: value.ended_at.map(DateTime::from_system_time),
        }
    }
}

impl From<MongoGameDocument> for GameEntity {
    fn from(value: MongoGameDocument) -> Self {
        Self {
            id: parse_uuid(&value.id),
            room_code: value.room_code,
            status: value.status,
            total_questions: to_u32(value.total_questions),
            current_question: to_u32(value.current_question),
            started_at: value.started_at.to_system_time(),
            ended_at: value.ended_at.map(DateTime::to_system_time),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    game_id: String,
    player_id: String,
    identity: String,
    display_name: String,
    total_score: i64,
    correct_answers: i64,
    total_answers: i64,
    response_time_total_ms: i64,
}

impl From<ScoreEntity> for MongoScoreDocument {
    fn from(value: ScoreEntity) -> Self {
        Self {
            game_id: value.game_id.to_string(),
            player_id: value.player_id.to_string(),
            identity: value.identity,
            display_name: value.display_name,
            total_score: value.total_score,
            correct_answers: i64::from(value.correct_answers),
            total_answers: i64::from(value.total_answers),
            response_time_total_ms: to_i64(value.response_time_total_ms),
        }
    }
}

impl From<MongoScoreDocument> for ScoreEntity {
    fn from(value: MongoScoreDocument) -> Self {
        Self {
            game_id: parse_uuid(&value.game_id),
            player_id: parse_uuid(&value.player_id),
            identity: value.identity,
            display_name: value.display_name,
            total_score: value.total_score,
            correct_answers: to_u32(value.correct_answers),
            total_answers: to_u32(value.total_answers),
            response_time_total_ms: u64::try_from(value.response_time_total_ms).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    #[serde(rename = "_id")]
    id: String,
    game_id: String,
    player_id: String,
    question_number: i64,
    selected_answer: i64,
    is_correct: Option<bool>,
    response_time_ms: i64,
    submitted_at: DateTime,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            game_id: value.game_id.to_string(),
            player_id: value.player_id.to_string(),
            question_number: i64::from(value.question_number),
            selected_answer: i64::from(value.selected_answer),
            is_correct: value.is_correct,
            response_time_ms: to_i64(value.response_time_ms),
            submitted_at: DateTime::from_system_time(value.submitted_at),
        }
    }
}

impl From<MongoAnswerDocument> for AnswerEntity {
    fn from(value: MongoAnswerDocument) -> Self {
        Self {
            id: parse_uuid(&value.id),
            game_id: parse_uuid(&value.game_id),
            player_id: parse_uuid(&value.player_id),
            question_number: to_u32(value.question_number),
            selected_answer: to_u32(value.selected_answer),
            is_correct: value.is_correct,
            response_time_ms: u64::try_from(value.response_time_ms).unwrap_or(0),
            submitted_at: value.submitted_at.to_system_time(),
        }
    }
}

pub fn uuid_key(id: Uuid) -> String {
    id.to_string()
}

pub fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn parse_json(value: &str) -> Option<serde_json::Value> {
    serde_json::from_str(value).ok()
}

fn parse_uuid(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap_or_default()
}
