use std::{sync::Arc, time::SystemTime};

use rand::Rng;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameEntity, PlayerEntity, PlayerUpdate, RoomEntity},
        quiz_store::QuizStore,
    },
    dto::{
        room::{CreateRoomRequest, JoinRoomRequest, RoomSnapshot},
        validation::{ROOM_CODE_LEN, parse_room_code, require_non_empty},
        ws::ServerMessage,
    },
    error::ServiceError,
    state::{
        SharedState,
        state_machine::{GameEvent, RoomEvent, RoomStatus},
        transitions::apply_game_event,
    },
};

/// Room plus everything a client needs to render it.
#[derive(Debug, Clone)]
pub struct RoomDetails {
    pub room: RoomEntity,
    /// Members in join order.
    pub players: Vec<PlayerEntity>,
    pub active_game: Option<GameEntity>,
}

impl RoomDetails {
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot::new(&self.room, &self.players, self.active_game.as_ref())
    }

    pub fn host(&self) -> Option<&PlayerEntity> {
        self.players.iter().find(|player| player.is_host)
    }
}

/// Result of [`join_room`].
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub player: PlayerEntity,
    /// The identity already had a membership.
    pub rejoined: bool,
    /// Rejoin while a game is starting or running.
    pub rejoined_game_in_progress: bool,
}

/// Draw a random code of uppercase letters.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}

/// Build a fresh membership row.
pub fn new_member(
    room_code: &str,
    identity: &str,
    display_name: &str,
    avatar_url: Option<String>,
    is_host: bool,
) -> PlayerEntity {
    let now = SystemTime::now();
    PlayerEntity {
        id: Uuid::new_v4(),
        room_code: room_code.to_owned(),
        identity: identity.to_owned(),
        display_name: display_name.to_owned(),
        avatar_url,
        is_host,
        is_ready: is_host,
        reconnection_token: None,
        device_id: None,
        music_data: None,
        joined_at: now,
        last_active_at: now,
    }
}

/// Fetch a room that exists and has not been closed.
pub async fn active_room(
    store: &Arc<dyn QuizStore>,
    room_code: &str,
) -> Result<RoomEntity, ServiceError> {
    let room = store
        .find_room(room_code.to_owned())
        .await?
        .ok_or_else(|| ServiceError::RoomNotFound(room_code.to_owned()))?;
    if !room.active {
        return Err(ServiceError::RoomInactive(room_code.to_owned()));
    }
    Ok(room)
}

/// Hold the gate of an existing room and return the room as read under it.
///
/// Unknown codes fail with [`ServiceError::RoomNotFound`] without allocating a gate.
pub async fn lock_room(
    state: &SharedState,
    store: &Arc<dyn QuizStore>,
    room_code: &str,
) -> Result<(OwnedMutexGuard<()>, RoomEntity), ServiceError> {
    if store.find_room(room_code.to_owned()).await?.is_none() {
        return Err(ServiceError::RoomNotFound(room_code.to_owned()));
    }
    let guard = state.room_gate(room_code).lock_owned().await;
    match active_room(store, room_code).await {
        Ok(room) => Ok((guard, room)),
        Err(err @ ServiceError::RoomNotFound(_)) => {
            // Deleted while waiting for the gate.
            drop(guard);
            state.forget_room_gate(room_code);
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Load members and the active game of `room`.
pub async fn load_details(
    store: &Arc<dyn QuizStore>,
    room: RoomEntity,
) -> Result<RoomDetails, ServiceError> {
    let players = store.list_players(room.code.clone()).await?;
    let active_game = store.find_active_game(room.code.clone()).await?;
    Ok(RoomDetails {
        room,
        players,
        active_game,
    })
}

/// Record activity on a room so the expiry sweep leaves it alone. Failures are only logged.
pub async fn touch_room(store: &Arc<dyn QuizStore>, room_code: &str) {
    if let Err(err) = store
        .touch_room(room_code.to_owned(), SystemTime::now())
        .await
    {
        warn!(room = %room_code, error = %err, "failed to record room activity");
    }
}

/// Open a room under a freshly generated code with the caller as its ready host.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<(RoomDetails, PlayerEntity), ServiceError> {
    require_non_empty("hostIdentity", &request.host_identity)?;
    require_non_empty("displayName", &request.display_name)?;
    let store = state.require_store().await?;
    let config = state.config();
    let attempts = config.code_generation_attempts;

    create_room_with(&store, attempts, request, config.default_max_players, generate_room_code)
        .await
}

async fn create_room_with<G>(
    store: &Arc<dyn QuizStore>,
    attempts: u32,
    request: CreateRoomRequest,
    default_max_players: u32,
    mut next_code: G,
) -> Result<(RoomDetails, PlayerEntity), ServiceError>
where
    G: FnMut() -> String,
{
    for attempt in 1..=attempts {
        let code = next_code();
        let now = SystemTime::now();
        let room = RoomEntity {
            code: code.clone(),
            host_identity: request.host_identity.clone(),
            status: RoomStatus::Waiting,
            max_players: request.max_players.unwrap_or(default_max_players),
            active: true,
            settings: request.settings.clone(),
            created_at: now,
            updated_at: now,
        };
        let host = new_member(
            &code,
            &request.host_identity,
            &request.display_name,
            request.avatar_url.clone(),
            true,
        );

        match store.insert_room(room.clone(), host.clone()).await {
            Ok(()) => {
                info!(room = %code, host = %request.host_identity, attempt, "room created");
                let details = RoomDetails {
                    room,
                    players: vec![host.clone()],
                    active_game: None,
                };
                return Ok((details, host));
            }
            Err(err) if err.is_duplicate() => {
                debug!(room = %code, attempt, "room code collision; regenerating");
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(attempts, "room code generation exhausted");
    Err(ServiceError::CodeGenerationExhausted { attempts })
}

/// Room with its members and active game.
pub async fn get_room(state: &SharedState, room_code: &str) -> Result<RoomDetails, ServiceError> {
    let code = parse_room_code(room_code)?;
    let store = state.require_store().await?;
    let room = active_room(&store, &code).await?;
    load_details(&store, room).await
}

/// Add the identity to the room, or return its existing membership.
pub async fn join_room(
    state: &SharedState,
    room_code: &str,
    request: JoinRoomRequest,
) -> Result<JoinOutcome, ServiceError> {
    require_non_empty("identity", &request.identity)?;
    require_non_empty("displayName", &request.display_name)?;
    let code = parse_room_code(room_code)?;
    let store = state.require_store().await?;

    let (_guard, room) = lock_room(state, &store, &code).await?;

    if let Some(existing) = store
        .find_player(code.clone(), request.identity.clone())
        .await?
    {
        debug!(room = %code, identity = %request.identity, "idempotent rejoin");
        return Ok(JoinOutcome {
            player: existing,
            rejoined: true,
            rejoined_game_in_progress: room.status.has_active_game(),
        });
    }

    let player = admit_new_member(
        &store,
        &room,
        &request.identity,
        &request.display_name,
        request.avatar_url,
    )
    .await?;
    touch_room(&store, &code).await;
    info!(room = %code, identity = %player.identity, "player joined room");

    Ok(JoinOutcome {
        player,
        rejoined: false,
        rejoined_game_in_progress: false,
    })
}

/// Insert a non-host, not-ready member after checking status and capacity.
///
/// Callers hold the room gate so the capacity check and the insert cannot interleave with
/// another join.
pub async fn admit_new_member(
    store: &Arc<dyn QuizStore>,
    room: &RoomEntity,
    identity: &str,
    display_name: &str,
    avatar_url: Option<String>,
) -> Result<PlayerEntity, ServiceError> {
    if room.status.has_active_game() {
        return Err(ServiceError::GameInProgress(room.code.clone()));
    }

    let members = store.list_players(room.code.clone()).await?;
    if members.len() >= room.max_players as usize {
        return Err(ServiceError::RoomFull {
            code: room.code.clone(),
            max_players: room.max_players,
        });
    }

    let player = new_member(&room.code, identity, display_name, avatar_url, false);
    match store.insert_player(player.clone()).await {
        Ok(()) => Ok(player),
        // Another instance admitted the same identity first; that row wins.
        Err(err) if err.is_duplicate() => store
            .find_player(room.code.clone(), identity.to_owned())
            .await?
            .ok_or_else(|| ServiceError::PlayerNotInRoom(room.code.clone())),
        Err(err) => Err(err.into()),
    }
}

/// Store the member's music preferences and mark them ready.
pub async fn share_music_data(
    state: &SharedState,
    room_code: &str,
    identity: &str,
    music_data: serde_json::Value,
) -> Result<PlayerEntity, ServiceError> {
    require_non_empty("identity", identity)?;
    let code = parse_room_code(room_code)?;
    let store = state.require_store().await?;
    let (_guard, _) = lock_room(state, &store, &code).await?;

    let update = PlayerUpdate {
        is_ready: Some(true),
        music_data: Some(music_data),
        last_active_at: Some(SystemTime::now()),
        ..PlayerUpdate::default()
    };
    let player = store
        .update_player(code.clone(), identity.to_owned(), update)
        .await?
        .ok_or_else(|| ServiceError::PlayerNotInRoom(code.clone()))?;
    touch_room(&store, &code).await;

    state.sessions().broadcast_room(
        &code,
        ServerMessage::PlayerReadyUpdate {
            identity: player.identity.clone(),
            is_ready: true,
        },
    );
    info!(room = %code, identity = %identity, "music data shared");
    Ok(player)
}

/// Leave the room. Returns `true` when the host left and the room was closed.
pub async fn leave_room(
    state: &SharedState,
    room_code: &str,
    identity: &str,
) -> Result<bool, ServiceError> {
    require_non_empty("identity", identity)?;
    let code = parse_room_code(room_code)?;
    let store = state.require_store().await?;

    let (_guard, room) = lock_room(state, &store, &code).await?;
    let player = store
        .find_player(code.clone(), identity.to_owned())
        .await?
        .ok_or_else(|| ServiceError::PlayerNotInRoom(code.clone()))?;

    if player.is_host {
        close_room(state, &store, &room, "host-left").await?;
        return Ok(true);
    }

    store.delete_player(code.clone(), identity.to_owned()).await?;
    state.sessions().detach_identity(&code, identity);
    state.sessions().broadcast_room(
        &code,
        ServerMessage::PlayerLeft {
            player_id: player.id,
            display_name: player.display_name.clone(),
        },
    );
    touch_room(&store, &code).await;
    info!(room = %code, identity = %identity, "player left room");
    Ok(false)
}

/// Soft-delete the room, finish any running game and release every attached connection.
async fn close_room(
    state: &SharedState,
    store: &Arc<dyn QuizStore>,
    room: &RoomEntity,
    reason: &str,
) -> Result<(), ServiceError> {
    room.status.plan(RoomEvent::Closed)?;

    if let Some(game) = store.find_active_game(room.code.clone()).await? {
        if let Err(err) = apply_game_event(store, game.id, game.status, GameEvent::Finish).await {
            warn!(room = %room.code, game_id = %game.id, error = %err, "failed to finish game of closing room");
        }
    }

    store.deactivate_room(room.code.clone()).await?;
    state.sessions().broadcast_room(
        &room.code,
        ServerMessage::RoomClosed {
            reason: reason.to_owned(),
        },
    );
    state.sessions().close_room(&room.code);
    info!(room = %room.code, reason, "room closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        dao::{
            models::{AnswerEntity, ScoreDelta, ScoreEntity},
            quiz_store::memory::MemoryQuizStore,
            storage::{StorageError, StorageResult},
        },
        services::testing::{TestClient, test_state},
        state::state_machine::GameStatus,
    };

    fn create_request(host: &str) -> CreateRoomRequest {
        CreateRoomRequest {
            host_identity: host.into(),
            display_name: host.to_uppercase(),
            avatar_url: None,
            max_players: None,
            settings: serde_json::Value::Null,
        }
    }

    fn join_request(identity: &str) -> JoinRoomRequest {
        JoinRoomRequest {
            identity: identity.into(),
            display_name: identity.to_uppercase(),
            avatar_url: None,
        }
    }

    /// Store whose room inserts always collide.
    struct CollidingStore {
        inner: MemoryQuizStore,
    }

    impl QuizStore for CollidingStore {
        fn insert_room(
            &self,
            _room: RoomEntity,
            _host: PlayerEntity,
        ) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Err(StorageError::Duplicate { entity: "room code" }) })
        }
        fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
            self.inner.find_room(code)
        }
        fn update_room_status(
            &self,
            code: String,
            expected: RoomStatus,
            next: RoomStatus,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.update_room_status(code, expected, next)
        }
        fn deactivate_room(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.deactivate_room(code)
        }
        fn touch_room(&self, code: String, at: SystemTime) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.touch_room(code, at)
        }
        fn delete_stale_rooms(
            &self,
            cutoff: SystemTime,
        ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
            self.inner.delete_stale_rooms(cutoff)
        }
        fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_player(player)
        }
        fn list_players(
            &self,
            code: String,
        ) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
            self.inner.list_players(code)
        }
        fn find_player(
            &self,
            code: String,
            identity: String,
        ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
            self.inner.find_player(code, identity)
        }
        fn update_player(
            &self,
            code: String,
            identity: String,
            update: PlayerUpdate,
        ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
            self.inner.update_player(code, identity, update)
        }
        fn delete_player(
            &self,
            code: String,
            identity: String,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.delete_player(code, identity)
        }
        fn insert_game_with_scores(
            &self,
            game: GameEntity,
            scores: Vec<ScoreEntity>,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_game_with_scores(game, scores)
        }
        fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
            self.inner.find_game(id)
        }
        fn find_active_game(
            &self,
            code: String,
        ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
            self.inner.find_active_game(code)
        }
        fn update_game_status(
            &self,
            id: Uuid,
            expected: GameStatus,
            next: GameStatus,
            ended_at: Option<SystemTime>,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.update_game_status(id, expected, next, ended_at)
        }
        fn advance_question(
            &self,
            id: Uuid,
            question: u32,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.advance_question(id, question)
        }
        fn increment_score(
            &self,
            game_id: Uuid,
            player_id: Uuid,
            delta: ScoreDelta,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.increment_score(game_id, player_id, delta)
        }
        fn list_scores(
            &self,
            game_id: Uuid,
        ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>> {
            self.inner.list_scores(game_id)
        }
        fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_answer(answer)
        }
        fn list_answers(
            &self,
            game_id: Uuid,
            question: u32,
        ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
            self.inner.list_answers(game_id, question)
        }
        fn count_answers(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
            self.inner.count_answers(game_id)
        }
        fn resolve_answer(
            &self,
            answer_id: Uuid,
            is_correct: bool,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.resolve_answer(answer_id, is_correct)
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    #[test]
    fn generated_codes_are_four_uppercase_letters() {
        for _ in 0..200 {
            let code = generate_room_code();
            assert_eq!(code.len(), 4);
            assert!(code.chars().all(|c| c.is_ascii_uppercase()), "{code}");
        }
    }

    #[tokio::test]
    async fn create_room_makes_caller_ready_host() {
        let state = test_state();
        let (details, host) = create_room(&state, create_request("h")).await.unwrap();

        assert_eq!(details.room.status, RoomStatus::Waiting);
        assert!(details.room.active);
        assert_eq!(details.room.max_players, 8);
        assert!(host.is_host && host.is_ready);
        assert_eq!(details.players.len(), 1);
    }

    #[tokio::test]
    async fn code_generation_gives_up_after_bounded_attempts() {
        let store: Arc<dyn QuizStore> = Arc::new(CollidingStore {
            inner: MemoryQuizStore::new(),
        });
        let mut calls = 0;
        let err = create_room_with(&store, 50, create_request("h"), 8, || {
            calls += 1;
            "ABCD".to_owned()
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::CodeGenerationExhausted { attempts: 50 }
        ));
        assert_eq!(calls, 50);
    }

    #[tokio::test]
    async fn collision_regenerates_a_different_code() {
        let store: Arc<dyn QuizStore> = Arc::new(MemoryQuizStore::new());
        create_room_with(&store, 5, create_request("first"), 8, || "ABCD".to_owned())
            .await
            .unwrap();

        let mut codes = vec!["ABCD", "ABCD", "WXYZ"].into_iter();
        let (details, _) = create_room_with(&store, 5, create_request("second"), 8, || {
            codes.next().unwrap_or("QQQQ").to_owned()
        })
        .await
        .unwrap();
        assert_eq!(details.room.code, "WXYZ");
    }

    #[tokio::test]
    async fn many_rooms_get_distinct_codes() {
        let state = test_state();
        let mut codes = HashSet::new();
        for i in 0..30 {
            let (details, _) = create_room(&state, create_request(&format!("h{i}")))
                .await
                .unwrap();
            assert!(codes.insert(details.room.code));
        }
    }

    #[tokio::test]
    async fn rejoin_returns_same_membership() {
        let state = test_state();
        let (details, _) = create_room(&state, create_request("h")).await.unwrap();
        let code = details.room.code;

        let first = join_room(&state, &code, join_request("p")).await.unwrap();
        let second = join_room(&state, &code, join_request("p")).await.unwrap();

        assert!(!first.rejoined);
        assert!(second.rejoined);
        assert_eq!(first.player.id, second.player.id);
        let room = get_room(&state, &code).await.unwrap();
        assert_eq!(room.players.len(), 2);
    }

    #[tokio::test]
    async fn rejoin_allowed_while_game_runs_but_newcomers_are_not() {
        let state = test_state();
        let (details, _) = create_room(&state, create_request("h")).await.unwrap();
        let code = details.room.code;
        let first = join_room(&state, &code, join_request("p")).await.unwrap();

        let store = state.require_store().await.unwrap();
        store
            .update_room_status(code.clone(), RoomStatus::Waiting, RoomStatus::InGame)
            .await
            .unwrap();

        let again = join_room(&state, &code, join_request("p")).await.unwrap();
        assert_eq!(again.player.id, first.player.id);
        assert!(again.rejoined_game_in_progress);

        let err = join_room(&state, &code, join_request("late")).await.unwrap_err();
        assert!(matches!(err, ServiceError::GameInProgress(_)));
        assert_eq!(store.list_players(code).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn full_room_rejects_newcomers() {
        let state = test_state();
        let mut request = create_request("h");
        request.max_players = Some(2);
        let (details, _) = create_room(&state, request).await.unwrap();
        let code = details.room.code;

        join_room(&state, &code, join_request("p1")).await.unwrap();
        let err = join_room(&state, &code, join_request("p2")).await.unwrap_err();
        assert!(matches!(err, ServiceError::RoomFull { max_players: 2, .. }));
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let state = test_state();
        let err = get_room(&state, "QQQQ").await.unwrap_err();
        assert!(matches!(err, ServiceError::RoomNotFound(_)));
        let err = get_room(&state, "Q1").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_codes_allocate_no_gate() {
        let state = test_state();
        let not_found = |result: Result<(), ServiceError>| {
            assert!(matches!(result, Err(ServiceError::RoomNotFound(_))));
        };

        not_found(join_room(&state, "QQQQ", join_request("p")).await.map(drop));
        not_found(leave_room(&state, "QQQQ", "p").await.map(drop));
        not_found(
            share_music_data(&state, "QQQQ", "p", serde_json::json!({}))
                .await
                .map(drop),
        );
        not_found(
            crate::services::lifecycle_service::start_game(&state, "QQQQ", "h")
                .await
                .map(drop),
        );
        not_found(crate::services::lifecycle_service::pause_game(&state, "QQQQ", "h", None).await);
        not_found(crate::services::lifecycle_service::resume_game(&state, "QQQQ", "h", None).await);

        assert!(!state.has_room_gate("QQQQ"));
    }

    #[tokio::test]
    async fn room_deleted_while_waiting_for_its_gate_releases_it() {
        let state = test_state();
        let (details, _) = create_room(&state, create_request("h")).await.unwrap();
        let code = details.room.code;
        let store = state.require_store().await.unwrap();

        let held = state.room_gate(&code).lock_owned().await;
        let waiter = {
            let (state, store, code) = (state.clone(), store.clone(), code.clone());
            tokio::spawn(async move { lock_room(&state, &store, &code).await.map(drop) })
        };
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        store
            .delete_stale_rooms(SystemTime::now() + std::time::Duration::from_secs(60))
            .await
            .unwrap();
        drop(held);

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ServiceError::RoomNotFound(_))));
        assert!(!state.has_room_gate(&code));
    }

    #[tokio::test]
    async fn share_music_data_marks_ready_and_notifies() {
        let state = test_state();
        let (details, _) = create_room(&state, create_request("h")).await.unwrap();
        let code = details.room.code;
        join_room(&state, &code, join_request("p")).await.unwrap();
        let mut host = TestClient::joined(&state, &code, "h").await;

        let player = share_music_data(&state, &code, "p", serde_json::json!({"topArtists": ["x"]}))
            .await
            .unwrap();
        assert!(player.is_ready);
        assert!(player.music_data.is_some());
        assert_eq!(
            host.next(),
            Some(ServerMessage::PlayerReadyUpdate {
                identity: "p".into(),
                is_ready: true,
            })
        );
    }

    #[tokio::test]
    async fn non_host_leave_keeps_host_and_room() {
        let state = test_state();
        let (details, host) = create_room(&state, create_request("h")).await.unwrap();
        let code = details.room.code;
        let joined = join_room(&state, &code, join_request("p")).await.unwrap();
        let mut host_client = TestClient::joined(&state, &code, "h").await;

        assert!(!leave_room(&state, &code, "p").await.unwrap());

        let room = get_room(&state, &code).await.unwrap();
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.host().map(|p| p.id), Some(host.id));
        assert_eq!(
            host_client.next(),
            Some(ServerMessage::PlayerLeft {
                player_id: joined.player.id,
                display_name: "P".into(),
            })
        );
    }

    #[tokio::test]
    async fn host_leave_closes_room_for_everyone() {
        let state = test_state();
        let (details, _) = create_room(&state, create_request("h")).await.unwrap();
        let code = details.room.code;
        join_room(&state, &code, join_request("p")).await.unwrap();
        let mut player = TestClient::joined(&state, &code, "p").await;

        assert!(leave_room(&state, &code, "h").await.unwrap());

        assert_eq!(
            player.next(),
            Some(ServerMessage::RoomClosed {
                reason: "host-left".into(),
            })
        );
        assert!(state.sessions().attachment(player.id).is_none());

        let err = get_room(&state, &code).await.unwrap_err();
        assert!(matches!(err, ServiceError::RoomInactive(_)));
        let err = share_music_data(&state, &code, "p", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RoomInactive(_)));

        let store = state.require_store().await.unwrap();
        let room = store.find_room(code).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(!room.active);
    }
}
