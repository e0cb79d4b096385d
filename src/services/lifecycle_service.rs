use std::{sync::Arc, time::SystemTime};

use tokio::{task::JoinHandle, time::sleep};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameEntity, PlayerEntity, ScoreEntity},
        quiz_store::QuizStore,
    },
    dto::{
        room::{GameStats, PlayerView, ScoreView},
        ws::ServerMessage,
    },
    error::ServiceError,
    services::room_service::{active_room, lock_room, touch_room},
    state::{
        SharedState,
        state_machine::{GameEvent, GameStatus, RoomEvent, RoomStatus},
        transitions::{apply_game_event, apply_room_event, run_game_transition_with_broadcast},
    },
};

/// A start that has been announced; the game is created by `completion` after the settle
/// delay.
pub struct PendingStart {
    /// The `game-start-initiated` event sent to the room.
    pub initiated: ServerMessage,
    pub completion: JoinHandle<Result<GameEntity, ServiceError>>,
}

/// Outcome of [`end_game`].
#[derive(Debug, Clone)]
pub struct FinishedGame {
    pub game: GameEntity,
    /// Highest total first.
    pub final_scores: Vec<ScoreEntity>,
    pub stats: GameStats,
}

async fn require_host(
    store: &Arc<dyn QuizStore>,
    room_code: &str,
    identity: &str,
    action: &'static str,
) -> Result<PlayerEntity, ServiceError> {
    let player = store
        .find_player(room_code.to_owned(), identity.to_owned())
        .await?
        .ok_or_else(|| ServiceError::PlayerNotInRoom(room_code.to_owned()))?;
    if !player.is_host {
        return Err(ServiceError::NotHost(action));
    }
    Ok(player)
}

/// Announce a start and schedule game creation.
///
/// The room moves to `STARTING` immediately; after the configured settle delay the game and
/// its zeroed score ledger are created and the room moves to `IN_GAME`. If creation fails the
/// room is told with `game-start-failed` and reverted to `WAITING`.
pub async fn start_game(
    state: &SharedState,
    room_code: &str,
    requester: &str,
) -> Result<PendingStart, ServiceError> {
    let store = state.require_store().await?;
    let config = state.config();

    let (guard, room) = lock_room(state, &store, room_code).await?;
    let host = require_host(&store, room_code, requester, "start the game").await?;
    if room.status.has_active_game() {
        return Err(ServiceError::GameAlreadyActive(room.code));
    }

    let players = store.list_players(room.code.clone()).await?;
    if players.len() < config.min_players {
        return Err(ServiceError::InsufficientPlayers {
            required: config.min_players,
            present: players.len(),
        });
    }
    if store.find_active_game(room.code.clone()).await?.is_some() {
        return Err(ServiceError::GameAlreadyActive(room.code));
    }

    apply_room_event(&store, &room.code, room.status, RoomEvent::StartRequested).await?;

    let initiated = ServerMessage::GameStartInitiated {
        host_name: host.display_name.clone(),
        player_count: players.len(),
        estimated_load_time: u64::try_from(config.estimated_load_time.as_millis())
            .unwrap_or(u64::MAX),
    };
    state.sessions().broadcast_room(&room.code, initiated.clone());
    info!(room = %room.code, players = players.len(), "game start initiated");
    drop(guard);

    let completion = tokio::spawn(complete_start(
        state.clone(),
        store,
        room.code.clone(),
    ));

    Ok(PendingStart {
        initiated,
        completion,
    })
}

async fn complete_start(
    state: SharedState,
    store: Arc<dyn QuizStore>,
    room_code: String,
) -> Result<GameEntity, ServiceError> {
    sleep(state.config().start_settle_delay).await;

    let gate = state.room_gate(&room_code);
    let _guard = gate.lock().await;

    match create_game(&state, &store, &room_code).await {
        Ok(game) => Ok(game),
        Err(err) => {
            warn!(room = %room_code, error = %err, "game creation failed after start was announced");
            state.sessions().broadcast_room(
                &room_code,
                ServerMessage::GameStartFailed {
                    message: err.public_message(),
                },
            );
            if let Err(revert_err) =
                apply_room_event(&store, &room_code, RoomStatus::Starting, RoomEvent::StartFailed)
                    .await
            {
                warn!(room = %room_code, error = %revert_err, "could not revert room after failed start");
            }
            Err(err)
        }
    }
}

async fn create_game(
    state: &SharedState,
    store: &Arc<dyn QuizStore>,
    room_code: &str,
) -> Result<GameEntity, ServiceError> {
    let config = state.config();
    let room = active_room(store, room_code).await?;
    // Plan now so a room that moved on while loading is reported before anything is created.
    room.status.plan(RoomEvent::GameCreated)?;

    let players = store.list_players(room.code.clone()).await?;
    let game = GameEntity {
        id: Uuid::new_v4(),
        room_code: room.code.clone(),
        status: GameStatus::Starting.plan(GameEvent::Begin)?.to,
        total_questions: config.total_questions,
        current_question: 1,
        started_at: SystemTime::now(),
        ended_at: None,
    };
    let scores: Vec<ScoreEntity> = players
        .iter()
        .map(|player| ScoreEntity::zeroed(game.id, player))
        .collect();

    match store.insert_game_with_scores(game.clone(), scores).await {
        Ok(()) => {}
        Err(err) if err.is_duplicate() => {
            return Err(ServiceError::GameAlreadyActive(room.code));
        }
        Err(err) => return Err(err.into()),
    }

    if let Err(err) = apply_room_event(store, &room.code, room.status, RoomEvent::GameCreated).await
    {
        // Do not leave a running game behind a room that never reached IN_GAME.
        if let Err(finish_err) =
            apply_game_event(store, game.id, game.status, GameEvent::Finish).await
        {
            warn!(game_id = %game.id, error = %finish_err, "failed to finish orphaned game");
        }
        return Err(err);
    }
    touch_room(store, &room.code).await;

    state.sessions().broadcast_room(
        &room.code,
        ServerMessage::GameStarted {
            game_id: game.id,
            total_questions: game.total_questions,
            players: players.iter().map(PlayerView::from).collect(),
        },
    );
    info!(room = %room.code, game_id = %game.id, players = players.len(), "game started");
    Ok(game)
}

/// Finish the game and send the room back to `WAITING`.
pub async fn end_game(
    state: &SharedState,
    game_id: Uuid,
    requester: &str,
) -> Result<FinishedGame, ServiceError> {
    let store = state.require_store().await?;
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::GameNotFound(game_id.to_string()))?;

    let gate = state.room_gate(&game.room_code);
    let _guard = gate.lock().await;

    require_host(&store, &game.room_code, requester, "end the game").await?;
    // Re-read under the gate; a concurrent end may have won.
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::GameNotFound(game_id.to_string()))?;
    apply_game_event(&store, game.id, game.status, GameEvent::Finish).await?;

    match store.find_room(game.room_code.clone()).await? {
        Some(room) if room.status == RoomStatus::InGame => {
            apply_room_event(&store, &room.code, room.status, RoomEvent::GameEnded).await?;
        }
        Some(room) => {
            warn!(room = %room.code, status = ?room.status, "room was not in game when its game ended");
        }
        None => {}
    }

    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::GameNotFound(game_id.to_string()))?;
    let final_scores = store.list_scores(game.id).await?;
    let total_answers = store.count_answers(game.id).await?;
    let stats = game_stats(&game, &final_scores, total_answers);
    touch_room(&store, &game.room_code).await;

    state.sessions().broadcast_room(
        &game.room_code,
        ServerMessage::GameFinished {
            game_id: game.id,
            final_scores: final_scores.iter().map(ScoreView::from).collect(),
            game_stats: stats.clone(),
        },
    );
    info!(room = %game.room_code, game_id = %game.id, "game finished");

    Ok(FinishedGame {
        game,
        final_scores,
        stats,
    })
}

fn game_stats(game: &GameEntity, scores: &[ScoreEntity], total_answers: u64) -> GameStats {
    let duration_ms = game
        .ended_at
        .and_then(|ended| ended.duration_since(game.started_at).ok())
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);

    GameStats {
        total_questions: game.total_questions,
        questions_played: game
            .current_question
            .saturating_sub(1)
            .min(game.total_questions),
        total_answers,
        correct_answers: scores
            .iter()
            .map(|score| u64::from(score.correct_answers))
            .sum(),
        duration_ms,
    }
}

/// Host-only pause of the room's running game.
pub async fn pause_game(
    state: &SharedState,
    room_code: &str,
    requester: &str,
    reason: Option<String>,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let (_guard, _) = lock_room(state, &store, room_code).await?;
    require_host(&store, room_code, requester, "pause the game").await?;
    let game = store
        .find_active_game(room_code.to_owned())
        .await?
        .ok_or(ServiceError::GameNotInProgress)?;
    if game.status != GameStatus::InProgress {
        return Err(ServiceError::GameNotInProgress);
    }

    run_game_transition_with_broadcast(
        state,
        &store,
        room_code,
        game.id,
        game.status,
        GameEvent::Pause,
        ServerMessage::GamePaused { reason },
    )
    .await?;
    Ok(())
}

/// Host-only resume of a paused game.
pub async fn resume_game(
    state: &SharedState,
    room_code: &str,
    requester: &str,
    time_remaining: Option<u64>,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let (_guard, _) = lock_room(state, &store, room_code).await?;
    require_host(&store, room_code, requester, "resume the game").await?;
    let game = store
        .find_active_game(room_code.to_owned())
        .await?
        .ok_or(ServiceError::GameNotInProgress)?;

    run_game_transition_with_broadcast(
        state,
        &store,
        room_code,
        game.id,
        game.status,
        GameEvent::Resume,
        ServerMessage::GameResumed { time_remaining },
    )
    .await?;
    Ok(())
}
