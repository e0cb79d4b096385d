use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAnswerDocument, MongoGameDocument, MongoPlayerDocument, MongoRoomDocument,
        MongoScoreDocument, player_update_document, to_i64, uuid_key,
    },
};
use crate::{
    dao::{
        models::{
            AnswerEntity, GameEntity, PlayerEntity, PlayerUpdate, RoomEntity, ScoreDelta,
            ScoreEntity,
        },
        quiz_store::QuizStore,
        storage::StorageResult,
    },
    state::state_machine::{GameStatus, RoomStatus},
};

const ROOMS: &str = "rooms";
const PLAYERS: &str = "players";
const GAMES: &str = "games";
const SCORES: &str = "scores";
const ANSWERS: &str = "answers";

/// MongoDB-backed [`QuizStore`].
#[derive(Clone)]
pub struct MongoQuizStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn unique_index(keys: Document, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(Some(name.to_owned()))
                .unique(Some(true))
                .build(),
        )
        .build()
}

fn status_key<S: serde::Serialize>(status: S) -> String {
    // Unit variants serialize to their renamed string.
    serde_json::to_value(status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_default()
}

impl MongoQuizStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let indexes: [(&'static str, &'static str, IndexModel); 4] = [
            (
                PLAYERS,
                "room_code,identity",
                unique_index(doc! {"room_code": 1, "identity": 1}, "player_membership_idx"),
            ),
            (
                SCORES,
                "game_id,player_id",
                unique_index(doc! {"game_id": 1, "player_id": 1}, "score_ledger_idx"),
            ),
            (
                ANSWERS,
                "game_id,player_id,question_number",
                unique_index(
                    doc! {"game_id": 1, "player_id": 1, "question_number": 1},
                    "answer_once_idx",
                ),
            ),
            (
                GAMES,
                "room_code(active)",
                IndexModel::builder()
                    .keys(doc! {"room_code": 1})
                    .options(
                        IndexOptions::builder()
                            .name(Some("active_game_per_room_idx".to_owned()))
                            .unique(Some(true))
                            .partial_filter_expression(Some(doc! {"active": true}))
                            .build(),
                    )
                    .build(),
            ),
        ];

        for (collection, index, model) in indexes {
            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database().await.collection(ROOMS)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        self.database().await.collection(PLAYERS)
    }

    async fn games(&self) -> Collection<MongoGameDocument> {
        self.database().await.collection(GAMES)
    }

    async fn scores(&self) -> Collection<MongoScoreDocument> {
        self.database().await.collection(SCORES)
    }

    async fn answers(&self) -> Collection<MongoAnswerDocument> {
        self.database().await.collection(ANSWERS)
    }

    async fn insert_room(&self, room: RoomEntity, host: PlayerEntity) -> MongoResult<()> {
        let code = room.code.clone();
        self.rooms()
            .await
            .insert_one(MongoRoomDocument::from(room))
            .await
            .map_err(MongoDaoError::write(ROOMS))?;

        if let Err(err) = self.insert_player(host).await {
            // Without its host the room is unusable; drop it so the code can be reused.
            if let Err(cleanup) = self.rooms().await.delete_one(doc! {"_id": code.as_str()}).await {
                warn!(room = %code, error = %cleanup, "failed to remove room after host insert failure");
            }
            return Err(err);
        }
        Ok(())
    }

    async fn find_room(&self, code: String) -> MongoResult<Option<RoomEntity>> {
        let document = self
            .rooms()
            .await
            .find_one(doc! {"_id": code})
            .await
            .map_err(MongoDaoError::read(ROOMS))?;
        Ok(document.map(Into::into))
    }

    async fn update_room_status(
        &self,
        code: String,
        expected: RoomStatus,
        next: RoomStatus,
    ) -> MongoResult<bool> {
        let result = self
            .rooms()
            .await
            .update_one(
                doc! {"_id": code, "status": status_key(expected)},
                doc! {"$set": {
                    "status": status_key(next),
                    "updated_at": DateTime::now(),
                }},
            )
            .await
            .map_err(MongoDaoError::write(ROOMS))?;
        Ok(result.modified_count > 0)
    }

    async fn deactivate_room(&self, code: String) -> MongoResult<bool> {
        let result = self
            .rooms()
            .await
            .update_one(
                doc! {"_id": code, "active": true},
                doc! {"$set": {
                    "active": false,
                    "status": status_key(RoomStatus::Finished),
                    "updated_at": DateTime::now(),
                }},
            )
            .await
            .map_err(MongoDaoError::write(ROOMS))?;
        Ok(result.modified_count > 0)
    }

    async fn touch_room(&self, code: String, at: SystemTime) -> MongoResult<()> {
        self.rooms()
            .await
            .update_one(
                doc! {"_id": code},
                doc! {"$max": {"updated_at": DateTime::from_system_time(at)}},
            )
            .await
            .map_err(MongoDaoError::write(ROOMS))?;
        Ok(())
    }

    async fn delete_stale_rooms(&self, cutoff: SystemTime) -> MongoResult<Vec<String>> {
        let stale: Vec<MongoRoomDocument> = self
            .rooms()
            .await
            .find(doc! {"updated_at": {"$lt": DateTime::from_system_time(cutoff)}})
            .await
            .map_err(MongoDaoError::read(ROOMS))?
            .try_collect()
            .await
            .map_err(MongoDaoError::read(ROOMS))?;
        let codes: Vec<String> = stale
            .into_iter()
            .map(|room| RoomEntity::from(room).code)
            .collect();
        if codes.is_empty() {
            return Ok(codes);
        }

        let games: Vec<MongoGameDocument> = self
            .games()
            .await
            .find(doc! {"room_code": {"$in": codes.clone()}})
            .await
            .map_err(MongoDaoError::read(GAMES))?
            .try_collect()
            .await
            .map_err(MongoDaoError::read(GAMES))?;
        let game_ids: Vec<String> = games
            .into_iter()
            .map(|game| uuid_key(GameEntity::from(game).id))
            .collect();

        // Children first so a partial failure never leaves orphans behind a deleted room.
        self.answers()
            .await
            .delete_many(doc! {"game_id": {"$in": game_ids.clone()}})
            .await
            .map_err(MongoDaoError::write(ANSWERS))?;
        self.scores()
            .await
            .delete_many(doc! {"game_id": {"$in": game_ids.clone()}})
            .await
            .map_err(MongoDaoError::write(SCORES))?;
        self.games()
            .await
            .delete_many(doc! {"room_code": {"$in": codes.clone()}})
            .await
            .map_err(MongoDaoError::write(GAMES))?;
        self.players()
            .await
            .delete_many(doc! {"room_code": {"$in": codes.clone()}})
            .await
            .map_err(MongoDaoError::write(PLAYERS))?;
        self.rooms()
            .await
            .delete_many(doc! {"_id": {"$in": codes.clone()}})
            .await
            .map_err(MongoDaoError::write(ROOMS))?;

        Ok(codes)
    }

    async fn insert_player(&self, player: PlayerEntity) -> MongoResult<()> {
        self.players()
            .await
            .insert_one(MongoPlayerDocument::from(player))
            .await
            .map_err(MongoDaoError::write(PLAYERS))?;
        Ok(())
    }

    async fn list_players(&self, code: String) -> MongoResult<Vec<PlayerEntity>> {
        let documents: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(doc! {"room_code": code})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(MongoDaoError::read(PLAYERS))?
            .try_collect()
            .await
            .map_err(MongoDaoError::read(PLAYERS))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn find_player(&self, code: String, identity: String) -> MongoResult<Option<PlayerEntity>> {
        let document = self
            .players()
            .await
            .find_one(doc! {"room_code": code, "identity": identity})
            .await
            .map_err(MongoDaoError::read(PLAYERS))?;
        Ok(document.map(Into::into))
    }

    async fn update_player(
        &self,
        code: String,
        identity: String,
        update: PlayerUpdate,
    ) -> MongoResult<Option<PlayerEntity>> {
        let Some(update) = player_update_document(&update) else {
            return self.find_player(code, identity).await;
        };

        let document = self
            .players()
            .await
            .find_one_and_update(doc! {"room_code": code, "identity": identity}, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(MongoDaoError::write(PLAYERS))?;
        Ok(document.map(Into::into))
    }

    async fn delete_player(&self, code: String, identity: String) -> MongoResult<bool> {
        let result = self
            .players()
            .await
            .delete_one(doc! {"room_code": code, "identity": identity})
            .await
            .map_err(MongoDaoError::write(PLAYERS))?;
        Ok(result.deleted_count > 0)
    }

    async fn insert_game_with_scores(
        &self,
        game: GameEntity,
        scores: Vec<ScoreEntity>,
    ) -> MongoResult<()> {
        let game_id = uuid_key(game.id);
        self.games()
            .await
            .insert_one(MongoGameDocument::from(game))
            .await
            .map_err(MongoDaoError::write(GAMES))?;

        if scores.is_empty() {
            return Ok(());
        }

        let documents: Vec<MongoScoreDocument> = scores.into_iter().map(Into::into).collect();
        if let Err(source) = self.scores().await.insert_many(documents).await {
            // Compensate so the room does not keep an active game without a ledger.
            if let Err(cleanup) = self.scores().await.delete_many(doc! {"game_id": game_id.as_str()}).await
            {
                warn!(game_id = %game_id, error = %cleanup, "failed to remove partial score ledger");
            }
            if let Err(cleanup) = self.games().await.delete_one(doc! {"_id": game_id.as_str()}).await {
                warn!(game_id = %game_id, error = %cleanup, "failed to remove game after ledger failure");
            }
            return Err(MongoDaoError::from_write(SCORES, source));
        }

        Ok(())
    }

    async fn find_game(&self, id: Uuid) -> MongoResult<Option<GameEntity>> {
        let document = self
            .games()
            .await
            .find_one(doc! {"_id": uuid_key(id)})
            .await
            .map_err(MongoDaoError::read(GAMES))?;
        Ok(document.map(Into::into))
    }

    async fn find_active_game(&self, code: String) -> MongoResult<Option<GameEntity>> {
        let document = self
            .games()
            .await
            .find_one(doc! {"room_code": code, "active": true})
            .await
            .map_err(MongoDaoError::read(GAMES))?;
        Ok(document.map(Into::into))
    }

    async fn update_game_status(
        &self,
        id: Uuid,
        expected: GameStatus,
        next: GameStatus,
        ended_at: Option<SystemTime>,
    ) -> MongoResult<bool> {
        let mut set = doc! {
            "status": status_key(next),
            "active": next.is_active(),
        };
        if let Some(at) = ended_at {
            set.insert("ended_at", DateTime::from_system_time(at));
        }

        let result = self
            .games()
            .await
            .update_one(
                doc! {"_id": uuid_key(id), "status": status_key(expected)},
                doc! {"$set": set},
            )
            .await
            .map_err(MongoDaoError::write(GAMES))?;
        Ok(result.modified_count > 0)
    }

    async fn advance_question(&self, id: Uuid, question: u32) -> MongoResult<()> {
        self.games()
            .await
            .update_one(
                doc! {"_id": uuid_key(id)},
                doc! {"$max": {"current_question": i64::from(question)}},
            )
            .await
            .map_err(MongoDaoError::write(GAMES))?;
        Ok(())
    }

    async fn increment_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> MongoResult<()> {
        self.scores()
            .await
            .update_one(
                doc! {"game_id": uuid_key(game_id), "player_id": uuid_key(player_id)},
                doc! {"$inc": {
                    "total_score": delta.points,
                    "correct_answers": i64::from(delta.correct_answers),
                    "total_answers": i64::from(delta.total_answers),
                    "response_time_total_ms": to_i64(delta.response_time_ms),
                }},
            )
            .await
            .map_err(MongoDaoError::write(SCORES))?;
        Ok(())
    }

    async fn list_scores(&self, game_id: Uuid) -> MongoResult<Vec<ScoreEntity>> {
        let documents: Vec<MongoScoreDocument> = self
            .scores()
            .await
            .find(doc! {"game_id": uuid_key(game_id)})
            .sort(doc! {"total_score": -1})
            .await
            .map_err(MongoDaoError::read(SCORES))?
            .try_collect()
            .await
            .map_err(MongoDaoError::read(SCORES))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_answer(&self, answer: AnswerEntity) -> MongoResult<()> {
        self.answers()
            .await
            .insert_one(MongoAnswerDocument::from(answer))
            .await
            .map_err(MongoDaoError::write(ANSWERS))?;
        Ok(())
    }

    async fn list_answers(&self, game_id: Uuid, question: u32) -> MongoResult<Vec<AnswerEntity>> {
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .await
            .find(doc! {"game_id": uuid_key(game_id), "question_number": i64::from(question)})
            .sort(doc! {"submitted_at": 1})
            .await
            .map_err(MongoDaoError::read(ANSWERS))?
            .try_collect()
            .await
            .map_err(MongoDaoError::read(ANSWERS))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn count_answers(&self, game_id: Uuid) -> MongoResult<u64> {
        self.answers()
            .await
            .count_documents(doc! {"game_id": uuid_key(game_id)})
            .await
            .map_err(MongoDaoError::read(ANSWERS))
    }

    async fn resolve_answer(&self, answer_id: Uuid, is_correct: bool) -> MongoResult<bool> {
        let result = self
            .answers()
            .await
            .update_one(
                doc! {"_id": uuid_key(answer_id), "is_correct": null},
                doc! {"$set": {"is_correct": is_correct}},
            )
            .await
            .map_err(MongoDaoError::write(ANSWERS))?;
        Ok(result.modified_count > 0)
    }
}

impl QuizStore for MongoQuizStore {
    fn insert_room(
        &self,
        room: RoomEntity,
        host: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_room(room, host).await.map_err(Into::into) })
    }

    fn find_room(&self, code: String) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room(code).await.map_err(Into::into) })
    }

    fn update_room_status(
        &self,
        code: String,
        expected: RoomStatus,
        next: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_room_status(code, expected, next)
                .await
                .map_err(Into::into)
        })
    }

    fn deactivate_room(&self, code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.deactivate_room(code).await.map_err(Into::into) })
    }

    fn touch_room(&self, code: String, at: SystemTime) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.touch_room(code, at).await.map_err(Into::into) })
    }

    fn delete_stale_rooms(
        &self,
        cutoff: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move { store.delete_stale_rooms(cutoff).await.map_err(Into::into) })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await.map_err(Into::into) })
    }

    fn list_players(&self, code: String) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_players(code).await.map_err(Into::into) })
    }

    fn find_player(
        &self,
        code: String,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(code, identity).await.map_err(Into::into) })
    }

    fn update_player(
        &self,
        code: String,
        identity: String,
        update: PlayerUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_player(code, identity, update)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_player(
        &self,
        code: String,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_player(code, identity).await.map_err(Into::into) })
    }

    fn insert_game_with_scores(
        &self,
        game: GameEntity,
        scores: Vec<ScoreEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert_game_with_scores(game, scores)
                .await
                .map_err(Into::into)
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await.map_err(Into::into) })
    }

    fn find_active_game(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_active_game(code).await.map_err(Into::into) })
    }

    fn update_game_status(
        &self,
        id: Uuid,
        expected: GameStatus,
        next: GameStatus,
        ended_at: Option<SystemTime>,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_game_status(id, expected, next, ended_at)
                .await
                .map_err(Into::into)
        })
    }

    fn advance_question(&self, id: Uuid, question: u32) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.advance_question(id, question).await.map_err(Into::into) })
    }

    fn increment_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .increment_score(game_id, player_id, delta)
                .await
                .map_err(Into::into)
        })
    }

    fn list_scores(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<ScoreEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_scores(game_id).await.map_err(Into::into) })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer(answer).await.map_err(Into::into) })
    }

    fn list_answers(
        &self,
        game_id: Uuid,
        question: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(game_id, question).await.map_err(Into::into) })
    }

    fn count_answers(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.count_answers(game_id).await.map_err(Into::into) })
    }

    fn resolve_answer(
        &self,
        answer_id: Uuid,
        is_correct: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .resolve_answer(answer_id, is_correct)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
