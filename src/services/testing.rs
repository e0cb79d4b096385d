//! Fixtures shared by service tests: an in-memory store and channel-backed connections.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    config::AppConfig,
    dao::quiz_store::memory::MemoryQuizStore,
    dto::{
        room::{CreateRoomRequest, JoinRoomRequest},
        ws::ServerMessage,
    },
    services::{room_service, session_service::{self, JoinRequest}},
    state::{AppState, SharedState, sessions::ConnectionId},
};

/// Defaults with no settle delay so starts complete immediately.
pub fn test_config() -> AppConfig {
    AppConfig {
        start_settle_delay: Duration::ZERO,
        estimated_load_time: Duration::from_millis(1_500),
        ..AppConfig::default()
    }
}

pub fn test_state() -> SharedState {
    test_state_with(test_config())
}

pub fn test_state_with(config: AppConfig) -> SharedState {
    AppState::with_store(config, Arc::new(MemoryQuizStore::new()))
}

/// Live `join-room` payload; credentials are derived from the identity.
pub fn join_request(room_code: &str, identity: &str) -> JoinRequest {
    JoinRequest {
        room_code: room_code.to_owned(),
        identity: identity.to_owned(),
        display_name: Some(identity.to_uppercase()),
        reconnection_token: Some(format!("token-{identity}")),
        device_id: Some(format!("device-{identity}")),
        ..JoinRequest::default()
    }
}

/// Room hosted by `h` with `players` joined through the REST path, in order.
pub async fn room_with_players(config: AppConfig, players: &[&str]) -> (SharedState, String) {
    let state = test_state_with(config);
    let (details, _) = room_service::create_room(
        &state,
        CreateRoomRequest {
            host_identity: "h".into(),
            display_name: "H".into(),
            avatar_url: None,
            max_players: None,
            settings: serde_json::Value::Null,
        },
    )
    .await
    .unwrap();
    let code = details.room.code;

    for identity in players {
        room_service::join_room(
            &state,
            &code,
            JoinRoomRequest {
                identity: (*identity).to_owned(),
                display_name: identity.to_uppercase(),
                avatar_url: None,
            },
        )
        .await
        .unwrap();
    }

    (state, code)
}

/// Connection whose socket is replaced by a channel.
pub struct TestClient {
    pub id: ConnectionId,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl TestClient {
    pub fn connect(state: &SharedState) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.sessions().register(tx);
        Self { id, rx }
    }

    /// Connect and join as `identity`, discarding the initial room snapshot.
    pub async fn joined(state: &SharedState, room_code: &str, identity: &str) -> Self {
        let mut client = Self::connect(state);
        session_service::handle_join(state, client.id, join_request(room_code, identity))
            .await
            .unwrap();
        client.drain();
        client
    }

    pub fn next(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }

    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
