use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::room::{GameStats, PlayerView, RoomSnapshot, ScoreView},
    error::{ErrorKind, ServiceError},
};

#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Attach this connection to a membership, creating it only when direct join is enabled.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        identity: String,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        avatar_url: Option<String>,
        #[serde(default)]
        reconnection_token: Option<String>,
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        #[schema(value_type = Option<Object>)]
        music_data: Option<serde_json::Value>,
    },
    /// Resume a membership with the credentials handed out on a previous join.
    #[serde(rename_all = "camelCase")]
    ReconnectToRoom {
        room_code: String,
        identity: String,
        reconnection_token: String,
        device_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReady { is_ready: bool },
    StartGame,
    /// `response_time` is in milliseconds.
    #[serde(rename_all = "camelCase")]
    AnswerSubmitted {
        question_number: u32,
        selected_answer: u32,
        response_time: u64,
    },
    #[serde(rename_all = "camelCase")]
    QuestionResults {
        question_number: u32,
        correct_answer: u32,
    },
    PauseGame {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ResumeGame {
        #[serde(default)]
        time_remaining: Option<u64>,
    },
    EndGame,
}

impl ClientMessage {
    pub fn from_json_str(payload: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(payload)
            .map_err(|err| ServiceError::InvalidInput(format!("malformed message: {err}")))
    }
}

/// Per-player outcome of a revealed question.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub player_id: Uuid,
    pub display_name: String,
    pub selected_answer: u32,
    pub is_correct: bool,
    pub response_time: u64,
    pub points_awarded: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
/// Events pushed to player WebSocket clients.
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full snapshot; always the first message after a join or reconnect.
    RoomState { room: RoomSnapshot },
    #[serde(rename_all = "camelCase")]
    PlayerConnected {
        player_id: Uuid,
        display_name: String,
        is_host: bool,
    },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        player_id: Uuid,
        display_name: String,
        is_host: bool,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReconnected {
        player_id: Uuid,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReadyUpdate { identity: String, is_ready: bool },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: Uuid,
        display_name: String,
    },
    RoomClosed { reason: String },
    /// `estimated_load_time` is in milliseconds.
    #[serde(rename_all = "camelCase")]
    GameStartInitiated {
        host_name: String,
        player_count: usize,
        estimated_load_time: u64,
    },
    #[serde(rename_all = "camelCase")]
    GameStarted {
        game_id: Uuid,
        total_questions: u32,
        players: Vec<PlayerView>,
    },
    GameStartFailed { message: String },
    #[serde(rename_all = "camelCase")]
    AnswerReceived {
        player_id: Uuid,
        question_number: u32,
        answers_received: usize,
        total_players: usize,
        all_answered: bool,
    },
    #[serde(rename_all = "camelCase")]
    QuestionResults {
        question_number: u32,
        correct_answer: u32,
        results: Vec<AnswerResult>,
    },
    #[serde(rename_all = "camelCase")]
    ScoresUpdated {
        scores: Vec<ScoreView>,
        question_number: u32,
    },
    GamePaused { reason: Option<String> },
    #[serde(rename_all = "camelCase")]
    GameResumed { time_remaining: Option<u64> },
    #[serde(rename_all = "camelCase")]
    GameFinished {
        game_id: Uuid,
        final_scores: Vec<ScoreView>,
        game_stats: GameStats,
    },
    Error {
        message: String,
        kind: ErrorKind,
        code: String,
    },
}

impl From<&ServiceError> for ServerMessage {
    fn from(err: &ServiceError) -> Self {
        ServerMessage::Error {
            message: err.public_message(),
            kind: err.kind(),
            code: err.code().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inbound_uses_kebab_tags_and_camel_fields() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"answer-submitted","questionNumber":1,"selectedAnswer":2,"responseTime":1500}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ClientMessage::AnswerSubmitted {
                question_number: 1,
                selected_answer: 2,
                response_time: 1500,
            }
        );

        let message = ClientMessage::from_json_str(r#"{"type":"start-game"}"#).unwrap();
        assert_eq!(message, ClientMessage::StartGame);
    }

    #[test]
    fn join_optional_fields_default_to_none() {
        let message =
            ClientMessage::from_json_str(r#"{"type":"join-room","roomCode":"ABCD","identity":"p"}"#)
                .unwrap();
        let ClientMessage::JoinRoom {
            reconnection_token,
            music_data,
            ..
        } = message
        else {
            panic!("expected join-room");
        };
        assert!(reconnection_token.is_none());
        assert!(music_data.is_none());
    }

    #[test]
    fn malformed_inbound_is_a_validation_error() {
        let err = ClientMessage::from_json_str(r#"{"type":"player-ready"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(ClientMessage::from_json_str(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn outbound_shape() {
        let message = ServerMessage::AnswerReceived {
            player_id: Uuid::nil(),
            question_number: 1,
            answers_received: 1,
            total_players: 2,
            all_answered: false,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "answer-received",
                "playerId": Uuid::nil(),
                "questionNumber": 1,
                "answersReceived": 1,
                "totalPlayers": 2,
                "allAnswered": false,
            })
        );

        let error = ServerMessage::from(&ServiceError::NotHost("start the game"));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "type": "error",
                "message": "only the host can start the game",
                "kind": "forbidden",
                "code": "NOT_HOST",
            })
        );
    }
}
