use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    error::ServiceError,
    services::{
        answer_service, lifecycle_service,
        session_service::{self, JoinRequest, ReconnectRequest, require_attachment},
    },
    state::{SharedState, sessions::ConnectionId},
};

/// Handle the full lifecycle of one player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection = state.sessions().register(outbound_tx);
    info!(connection = %connection, "player socket opened");

    // Dedicated writer task keeps room broadcasts flowing while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        let mut outbound = UnboundedReceiverStream::new(outbound_rx);
        while let Some(message) = outbound.next().await {
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize outbound message `{message:?}`");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection = %connection, payload = %text, "received client message");
                let result = match ClientMessage::from_json_str(&text) {
                    Ok(message) => dispatch(&state, connection, message).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    warn!(connection = %connection, error = %err, "client message rejected");
                    if !state.sessions().send_to(connection, ServerMessage::from(&err)) {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!(connection = %connection, "player socket closed by client");
                break;
            }
            // Pings are answered by the protocol layer.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    session_service::handle_disconnect(&state, connection).await;
    finalize(writer_task).await;
}

/// Route one inbound message to the service handling it.
///
/// Errors are returned to the caller, which reports them to the originating connection only.
pub async fn dispatch(
    state: &SharedState,
    connection: ConnectionId,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    match message {
        ClientMessage::JoinRoom {
            room_code,
            identity,
            display_name,
            avatar_url,
            reconnection_token,
            device_id,
            music_data,
        } => {
            session_service::handle_join(
                state,
                connection,
                JoinRequest {
                    room_code,
                    identity,
                    display_name,
                    avatar_url,
                    reconnection_token,
                    device_id,
                    music_data,
                },
            )
            .await?;
        }
        ClientMessage::ReconnectToRoom {
            room_code,
            identity,
            reconnection_token,
            device_id,
        } => {
            session_service::handle_reconnect(
                state,
                connection,
                ReconnectRequest {
                    room_code,
                    identity,
                    reconnection_token,
                    device_id,
                },
            )
            .await?;
        }
        ClientMessage::PlayerReady { is_ready } => {
            session_service::player_ready(state, connection, is_ready).await?;
        }
        ClientMessage::StartGame => {
            let attachment = require_attachment(state, connection)?;
            // Creation finishes in the background and reports its own outcome to the room.
            lifecycle_service::start_game(state, &attachment.room_code, &attachment.identity)
                .await?;
        }
        ClientMessage::AnswerSubmitted {
            question_number,
            selected_answer,
            response_time,
        } => {
            let attachment = require_attachment(state, connection)?;
            let game_id = answer_service::active_game_id(state, &attachment.room_code).await?;
            answer_service::submit_answer(
                state,
                game_id,
                &attachment.identity,
                question_number,
                selected_answer,
                response_time,
            )
            .await?;
        }
        ClientMessage::QuestionResults {
            question_number,
            correct_answer,
        } => {
            let attachment = require_attachment(state, connection)?;
            let game_id = answer_service::active_game_id(state, &attachment.room_code).await?;
            answer_service::reveal_results(
                state,
                game_id,
                &attachment.identity,
                question_number,
                correct_answer,
            )
            .await?;
        }
        ClientMessage::PauseGame { reason } => {
            let attachment = require_attachment(state, connection)?;
            lifecycle_service::pause_game(state, &attachment.room_code, &attachment.identity, reason)
                .await?;
        }
        ClientMessage::ResumeGame { time_remaining } => {
            let attachment = require_attachment(state, connection)?;
            lifecycle_service::resume_game(
                state,
                &attachment.room_code,
                &attachment.identity,
                time_remaining,
            )
            .await?;
        }
        ClientMessage::EndGame => {
            let attachment = require_attachment(state, connection)?;
            let game_id = answer_service::active_game_id(state, &attachment.room_code).await?;
            lifecycle_service::end_game(state, game_id, &attachment.identity).await?;
        }
    }
    Ok(())
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>) {
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        services::testing::{TestClient, room_with_players, test_config, test_state_with},
    };

    fn join(code: &str, identity: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_code: code.to_owned(),
            identity: identity.to_owned(),
            display_name: Some(identity.to_uppercase()),
            avatar_url: None,
            reconnection_token: Some(format!("token-{identity}")),
            device_id: Some(format!("device-{identity}")),
            music_data: None,
        }
    }

    #[tokio::test]
    async fn room_commands_require_a_join_first() {
        let state = test_state_with(test_config());
        let client = TestClient::connect(&state);

        let err = dispatch(&state, client.id, ClientMessage::StartGame)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAttached));
        let err = dispatch(&state, client.id, ClientMessage::PlayerReady { is_ready: true })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAttached));
    }

    #[tokio::test]
    async fn full_round_over_messages() {
        let (state, code) = room_with_players(test_config(), &["p"]).await;
        let mut host = TestClient::connect(&state);
        let mut player = TestClient::connect(&state);

        dispatch(&state, host.id, join(&code, "h")).await.unwrap();
        dispatch(&state, player.id, join(&code, "p")).await.unwrap();
        assert!(matches!(host.next(), Some(ServerMessage::RoomState { .. })));
        assert!(matches!(
            host.next(),
            Some(ServerMessage::PlayerConnected { .. })
        ));
        assert!(matches!(player.next(), Some(ServerMessage::RoomState { .. })));

        dispatch(&state, player.id, ClientMessage::StartGame)
            .await
            .unwrap_err();
        dispatch(&state, host.id, ClientMessage::StartGame)
            .await
            .unwrap();
        // Zero settle delay: wait for the background creation to land.
        let started = loop {
            if let Some(message) = player.next() {
                if matches!(message, ServerMessage::GameStarted { .. }) {
                    break message;
                }
                continue;
            }
            tokio::task::yield_now().await;
        };
        assert!(matches!(started, ServerMessage::GameStarted { total_questions: 10, .. }));

        for (client, selected) in [(&player, 1), (&host, 2)] {
            dispatch(
                &state,
                client.id,
                ClientMessage::AnswerSubmitted {
                    question_number: 1,
                    selected_answer: selected,
                    response_time: 800,
                },
            )
            .await
            .unwrap();
        }
        dispatch(
            &state,
            host.id,
            ClientMessage::QuestionResults {
                question_number: 1,
                correct_answer: 1,
            },
        )
        .await
        .unwrap();
        dispatch(&state, host.id, ClientMessage::EndGame).await.unwrap();

        let tail = player.drain();
        let Some(ServerMessage::GameFinished { final_scores, .. }) = tail.last() else {
            panic!("expected game-finished last, got {tail:?}");
        };
        assert_eq!(final_scores[0].identity, "p");
        assert_eq!(final_scores[0].total_score, 100);
        drop(host.drain());
    }

    #[tokio::test]
    async fn direct_join_is_gated_by_config() {
        let (state, code) = room_with_players(test_config(), &[]).await;
        let client = TestClient::connect(&state);
        let err = dispatch(&state, client.id, join(&code, "newcomer"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PlayerNotInRoom(_)));

        let (state, code) = room_with_players(
            AppConfig {
                allow_direct_join: true,
                ..test_config()
            },
            &[],
        )
        .await;
        let mut client = TestClient::connect(&state);
        dispatch(&state, client.id, join(&code, "newcomer"))
            .await
            .unwrap();
        let Some(ServerMessage::RoomState { room }) = client.next() else {
            panic!("expected room-state");
        };
        assert_eq!(room.players.len(), 2);
    }
}
