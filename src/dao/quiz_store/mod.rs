pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, GameEntity, PlayerEntity, PlayerUpdate, RoomEntity, ScoreDelta,
            ScoreEntity,
        },
        storage::StorageResult,
    },
    state::state_machine::{GameStatus, RoomStatus},
};

/// Abstraction over the persistence layer for rooms, memberships, games, scores and answers.
///
/// Uniqueness constraints are enforced by the backend and reported as
/// [`StorageError::Duplicate`](crate::dao::storage::StorageError::Duplicate); callers never
/// check-then-insert.
pub trait QuizStore: Send + Sync {
    /// Insert a room together with its host membership. Fails with a duplicate error when the
    /// code is already taken.
    fn insert_room(
        &self,
        room: RoomEntity,
        host: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Set the room status only if it still equals `expected`. Returns whether it changed.
    fn update_room_status(
        &self,
        code: String,
        expected: RoomStatus,
        next: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Mark the room inactive and finished.
    fn deactivate_room(&self, code: String) -> BoxFuture<'static, StorageResult<bool>>;
    fn touch_room(&self, code: String, at: SystemTime) -> BoxFuture<'static, StorageResult<()>>;
    /// Hard-delete rooms untouched since `cutoff` with everything that belongs to them.
    /// Returns the deleted codes.
    fn delete_stale_rooms(
        &self,
        cutoff: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>>;

    /// Fails with a duplicate error when the identity is already a member.
    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Members ordered by join time.
    fn list_players(&self, code: String) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    fn find_player(
        &self,
        code: String,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Returns the updated row, or `None` when no membership matched.
    fn update_player(
        &self,
        code: String,
        identity: String,
        update: PlayerUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    fn delete_player(
        &self,
        code: String,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Create the game and its score ledger as one unit. Fails with a duplicate error when
    /// the room already has a game that is not finished.
    fn insert_game_with_scores(
        &self,
        game: GameEntity,
        scores: Vec<ScoreEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    fn find_active_game(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Compare-and-set the game status, recording `ended_at` when given.
    fn update_game_status(
        &self,
        id: Uuid,
        expected: GameStatus,
        next: GameStatus,
        ended_at: Option<SystemTime>,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Raise the current-question pointer to `question`; never lowers it.
    fn advance_question(&self, id: Uuid, question: u32) -> BoxFuture<'static, StorageResult<()>>;

    /// Apply `delta` additively at the store.
    fn increment_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Score rows ordered by total score, highest first.
    fn list_scores(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>>;

    /// Fails with a duplicate error when the player already answered this question.
    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_answers(
        &self,
        game_id: Uuid,
        question: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    fn count_answers(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<u64>>;
    /// Set correctness only if still unresolved. Returns whether this call resolved it.
    fn resolve_answer(
        &self,
        answer_id: Uuid,
        is_correct: bool,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
