use std::{sync::Arc, time::SystemTime};

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::quiz_store::QuizStore,
    dto::ws::ServerMessage,
    error::ServiceError,
    state::{
        SharedState,
        state_machine::{
            GameEvent, GameStatus, GameTransition, InvalidTransition, RoomEvent, RoomStatus,
            RoomTransition,
        },
    },
};

/// Validate `event` against the room's current status and persist the result with a
/// compare-and-set, so a concurrent change is reported instead of overwritten.
pub async fn apply_room_event(
    store: &Arc<dyn QuizStore>,
    room_code: &str,
    from: RoomStatus,
    event: RoomEvent,
) -> Result<RoomTransition, ServiceError> {
    let transition = from.plan(event)?;
    let applied = store
        .update_room_status(room_code.to_owned(), transition.from, transition.to)
        .await?;

    if !applied {
        let actual = store
            .find_room(room_code.to_owned())
            .await?
            .map(|room| room.status)
            .unwrap_or(transition.from);
        return Err(InvalidTransition::new(actual, event).into());
    }

    info!(
        room = %room_code,
        from = ?transition.from,
        to = ?transition.to,
        event = ?event,
        "room transition applied"
    );
    Ok(transition)
}

/// Game counterpart of [`apply_room_event`]. `Finish` stamps the end time.
pub async fn apply_game_event(
    store: &Arc<dyn QuizStore>,
    game_id: Uuid,
    from: GameStatus,
    event: GameEvent,
) -> Result<GameTransition, ServiceError> {
    let transition = from.plan(event)?;
    let ended_at = (transition.to == GameStatus::Finished).then(SystemTime::now);
    let applied = store
        .update_game_status(game_id, transition.from, transition.to, ended_at)
        .await?;

    if !applied {
        let actual = store
            .find_game(game_id)
            .await?
            .map(|game| game.status)
            .unwrap_or(transition.from);
        return Err(InvalidTransition::new(actual, event).into());
    }

    info!(
        game_id = %game_id,
        from = ?transition.from,
        to = ?transition.to,
        event = ?event,
        "game transition applied"
    );
    Ok(transition)
}

/// Apply a room transition, then announce it to every connection in the room.
pub async fn run_room_transition_with_broadcast(
    state: &SharedState,
    store: &Arc<dyn QuizStore>,
    room_code: &str,
    from: RoomStatus,
    event: RoomEvent,
    message: ServerMessage,
) -> Result<RoomTransition, ServiceError> {
    let transition = apply_room_event(store, room_code, from, event).await?;
    state.sessions().broadcast_room(room_code, message);
    Ok(transition)
}

/// Apply a game transition, then announce it to every connection in the room.
pub async fn run_game_transition_with_broadcast(
    state: &SharedState,
    store: &Arc<dyn QuizStore>,
    room_code: &str,
    game_id: Uuid,
    from: GameStatus,
    event: GameEvent,
    message: ServerMessage,
) -> Result<GameTransition, ServiceError> {
    let transition = apply_game_event(store, game_id, from, event).await?;
    state.sessions().broadcast_room(room_code, message);
    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        models::{PlayerEntity, RoomEntity},
        quiz_store::memory::MemoryQuizStore,
    };

    async fn store_with_room(status: RoomStatus) -> Arc<dyn QuizStore> {
        let store: Arc<dyn QuizStore> = Arc::new(MemoryQuizStore::new());
        let now = SystemTime::now();
        let room = RoomEntity {
            code: "ABCD".into(),
            host_identity: "host".into(),
            status,
            max_players: 8,
            active: true,
            settings: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        let host = PlayerEntity {
            id: Uuid::new_v4(),
            room_code: "ABCD".into(),
            identity: "host".into(),
            display_name: "Host".into(),
            avatar_url: None,
            is_host: true,
            is_ready: true,
            reconnection_token: None,
            device_id: None,
            music_data: None,
            joined_at: now,
            last_active_at: now,
        };
        store.insert_room(room, host).await.unwrap();
        store
    }

    #[tokio::test]
    async fn stale_status_is_reported_not_overwritten() {
        let store = store_with_room(RoomStatus::Starting).await;

        // Caller believes the room is still waiting.
        let err = apply_room_event(&store, "ABCD", RoomStatus::Waiting, RoomEvent::StartRequested)
            .await
            .unwrap_err();
        match err {
            ServiceError::InvalidTransition(invalid) => assert_eq!(invalid.from, "Starting"),
            other => panic!("unexpected error: {other:?}"),
        }
        let room = store.find_room("ABCD".into()).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Starting);
    }

    #[tokio::test]
    async fn illegal_event_never_reaches_the_store() {
        let store = store_with_room(RoomStatus::Finished).await;
        let err = apply_room_event(&store, "ABCD", RoomStatus::Finished, RoomEvent::GameCreated)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn applied_transition_persists() {
        let store = store_with_room(RoomStatus::Waiting).await;
        let transition =
            apply_room_event(&store, "ABCD", RoomStatus::Waiting, RoomEvent::StartRequested)
                .await
                .unwrap();
        assert_eq!(transition.to, RoomStatus::Starting);
        let room = store.find_room("ABCD".into()).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Starting);
    }
}
