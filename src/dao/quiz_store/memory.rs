//! Process-local [`QuizStore`] keeping every collection behind one async mutex.
//!
//! Each operation runs under the lock, so uniqueness checks and increments are atomic with
//! respect to each other just like the constraints of a real database.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::QuizStore;
use crate::{
    dao::{
        models::{
            AnswerEntity, GameEntity, PlayerEntity, PlayerUpdate, RoomEntity, ScoreDelta,
            ScoreEntity,
        },
        storage::{StorageError, StorageResult},
    },
    state::state_machine::{GameStatus, RoomStatus},
};

#[derive(Default)]
struct Tables {
    rooms: HashMap<String, RoomEntity>,
    players: Vec<PlayerEntity>,
    games: HashMap<Uuid, GameEntity>,
    scores: Vec<ScoreEntity>,
    answers: Vec<AnswerEntity>,
}

impl Tables {
    fn has_player(&self, code: &str, identity: &str) -> bool {
        self.players
            .iter()
            .any(|p| p.room_code == code && p.identity == identity)
    }

    fn remove_room_cascade(&mut self, code: &str) {
        self.rooms.remove(code);
        self.players.retain(|p| p.room_code != code);
        let game_ids: Vec<Uuid> = self
            .games
            .values()
            .filter(|g| g.room_code == code)
            .map(|g| g.id)
            .collect();
        for id in &game_ids {
            self.games.remove(id);
        }
        self.scores.retain(|s| !game_ids.contains(&s.game_id));
        self.answers.retain(|a| !game_ids.contains(&a.game_id));
    }
}

/// In-memory [`QuizStore`] used by tests and the `memory` backend.
#[derive(Clone, Default)]
pub struct MemoryQuizStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuizStore for MemoryQuizStore {
    fn insert_room(
        &self,
        room: RoomEntity,
        host: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            if t.rooms.contains_key(&room.code) {
                return Err(StorageError::Duplicate { entity: "room code" });
            }
            t.rooms.insert(room.code.clone(), room);
            t.players.push(host);
            Ok(())
        })
    }

    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.rooms.get(&code).cloned()) })
    }

    fn update_room_status(
        &self,
        code: String,
        expected: RoomStatus,
        next: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            match t.rooms.get_mut(&code) {
                Some(room) if room.status == expected => {
                    room.status = next;
                    room.updated_at = SystemTime::now();
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn deactivate_room(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            match t.rooms.get_mut(&code) {
                Some(room) if room.active => {
                    room.active = false;
                    room.status = RoomStatus::Finished;
                    room.updated_at = SystemTime::now();
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn touch_room(&self, code: String, at: SystemTime) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            if let Some(room) = tables.lock().await.rooms.get_mut(&code) {
                room.updated_at = room.updated_at.max(at);
            }
            Ok(())
        })
    }

    fn delete_stale_rooms(
        &self,
        cutoff: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            let stale: Vec<String> = t
                .rooms
                .values()
                .filter(|room| room.updated_at < cutoff)
                .map(|room| room.code.clone())
                .collect();
            for code in &stale {
                t.remove_room_cascade(code);
            }
            Ok(stale)
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            if t.has_player(&player.room_code, &player.identity) {
                return Err(StorageError::Duplicate { entity: "membership" });
            }
            t.players.push(player);
            Ok(())
        })
    }

    fn list_players(&self, code: String) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let t = tables.lock().await;
            let mut players: Vec<PlayerEntity> = t
                .players
                .iter()
                .filter(|p| p.room_code == code)
                .cloned()
                .collect();
            players.sort_by_key(|p| p.joined_at);
            Ok(players)
        })
    }

    fn find_player(
        &self,
        code: String,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let t = tables.lock().await;
            Ok(t.players
                .iter()
                .find(|p| p.room_code == code && p.identity == identity)
                .cloned())
        })
    }

    fn update_player(
        &self,
        code: String,
        identity: String,
        update: PlayerUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            let Some(player) = t
                .players
                .iter_mut()
                .find(|p| p.room_code == code && p.identity == identity)
            else {
                return Ok(None);
            };
            update.apply_to(player);
            Ok(Some(player.clone()))
        })
    }

    fn delete_player(
        &self,
        code: String,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            let before = t.players.len();
            t.players
                .retain(|p| !(p.room_code == code && p.identity == identity));
            Ok(t.players.len() != before)
        })
    }

    fn insert_game_with_scores(
        &self,
        game: GameEntity,
        scores: Vec<ScoreEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            if t
                .games
                .values()
                .any(|g| g.room_code == game.room_code && g.status.is_active())
            {
                return Err(StorageError::Duplicate { entity: "active game" });
            }
            t.games.insert(game.id, game);
            t.scores.extend(scores);
            Ok(())
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.games.get(&id).cloned()) })
    }

    fn find_active_game(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let t = tables.lock().await;
            Ok(t.games
                .values()
                .find(|g| g.room_code == code && g.status.is_active())
                .cloned())
        })
    }

    fn update_game_status(
        &self,
        id: Uuid,
        expected: GameStatus,
        next: GameStatus,
        ended_at: Option<SystemTime>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            match t.games.get_mut(&id) {
                Some(game) if game.status == expected => {
                    game.status = next;
                    if ended_at.is_some() {
                        game.ended_at = ended_at;
                    }
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn advance_question(&self, id: Uuid, question: u32) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            if let Some(game) = tables.lock().await.games.get_mut(&id) {
                game.current_question = game.current_question.max(question);
            }
            Ok(())
        })
    }

    fn increment_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            if let Some(score) = t
                .scores
                .iter_mut()
                .find(|s| s.game_id == game_id && s.player_id == player_id)
            {
                score.total_score = score.total_score.saturating_add(delta.points);
                score.correct_answers = score.correct_answers.saturating_add(delta.correct_answers);
                score.total_answers = score.total_answers.saturating_add(delta.total_answers);
                score.response_time_total_ms = score
                    .response_time_total_ms
                    .saturating_add(delta.response_time_ms);
            }
            Ok(())
        })
    }

    fn list_scores(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let t = tables.lock().await;
            let mut scores: Vec<ScoreEntity> = t
                .scores
                .iter()
                .filter(|s| s.game_id == game_id)
                .cloned()
                .collect();
            // Stable sort keeps insertion order for ties.
            scores.sort_by(|a, b| b.total_score.cmp(&a.total_score));
            Ok(scores)
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            if t.answers.iter().any(|a| {
                a.game_id == answer.game_id
                    && a.player_id == answer.player_id
                    && a.question_number == answer.question_number
            }) {
                return Err(StorageError::Duplicate { entity: "answer" });
            }
            t.answers.push(answer);
            Ok(())
        })
    }

    fn list_answers(
        &self,
        game_id: Uuid,
        question: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let t = tables.lock().await;
            Ok(t.answers
                .iter()
                .filter(|a| a.game_id == game_id && a.question_number == question)
                .cloned()
                .collect())
        })
    }

    fn count_answers(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let t = tables.lock().await;
            Ok(t.answers.iter().filter(|a| a.game_id == game_id).count() as u64)
        })
    }

    fn resolve_answer(
        &self,
        answer_id: Uuid,
        is_correct: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut t = tables.lock().await;
            match t.answers.iter_mut().find(|a| a.id == answer_id) {
                Some(answer) if answer.is_correct.is_none() => {
                    answer.is_correct = Some(is_correct);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
