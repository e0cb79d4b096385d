use std::{sync::Arc, time::SystemTime};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, GameEntity, ScoreDelta, ScoreEntity},
        quiz_store::QuizStore,
    },
    dto::{
        room::ScoreView,
        ws::{AnswerResult, ServerMessage},
    },
    error::ServiceError,
    services::room_service::touch_room,
    state::{SharedState, state_machine::GameStatus},
};

/// Longest response time accepted for one answer: an hour.
pub const MAX_RESPONSE_TIME_MS: u64 = 60 * 60 * 1000;

/// Progress of a question after an answer was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerProgress {
    pub answers_received: usize,
    pub total_players: usize,
    pub all_answered: bool,
}

/// Outcome of revealing a question.
#[derive(Debug, Clone)]
pub struct QuestionOutcome {
    pub results: Vec<AnswerResult>,
    /// Ledger after scoring, highest total first.
    pub scores: Vec<ScoreEntity>,
}

async fn require_game(store: &Arc<dyn QuizStore>, game_id: Uuid) -> Result<GameEntity, ServiceError> {
    store
        .find_game(game_id)
        .await?
        .ok_or_else(|| ServiceError::GameNotFound(game_id.to_string()))
}

/// Record one answer of `identity` and announce progress to the room.
///
/// At most one answer per player and question is ever stored; the store enforces it, so
/// concurrent submissions resolve to exactly one success.
pub async fn submit_answer(
    state: &SharedState,
    game_id: Uuid,
    identity: &str,
    question_number: u32,
    selected_answer: u32,
    response_time_ms: u64,
) -> Result<AnswerProgress, ServiceError> {
    if response_time_ms > MAX_RESPONSE_TIME_MS {
        return Err(ServiceError::InvalidInput(format!(
            "response time must not exceed {MAX_RESPONSE_TIME_MS} ms"
        )));
    }
    let store = state.require_store().await?;
    let game = require_game(&store, game_id).await?;

    let gate = state.room_gate(&game.room_code);
    let _guard = gate.lock().await;

    let game = require_game(&store, game_id).await?;
    if game.status != GameStatus::InProgress {
        return Err(ServiceError::GameNotInProgress);
    }
    if question_number == 0 || question_number > game.total_questions {
        return Err(ServiceError::InvalidInput(format!(
            "question number must be between 1 and {}",
            game.total_questions
        )));
    }
    if question_number < game.current_question {
        return Err(ServiceError::QuestionAlreadyResolved(question_number));
    }

    let player = store
        .find_player(game.room_code.clone(), identity.to_owned())
        .await?
        .ok_or(ServiceError::PlayerNotInGame)?;

    let answer = AnswerEntity {
        id: Uuid::new_v4(),
        game_id,
        player_id: player.id,
        question_number,
        selected_answer,
        is_correct: None,
        response_time_ms,
        submitted_at: SystemTime::now(),
    };
    match store.insert_answer(answer).await {
        Ok(()) => {}
        Err(err) if err.is_duplicate() => {
            return Err(ServiceError::DuplicateAnswer(question_number));
        }
        Err(err) => return Err(err.into()),
    }

    let answers_received = store.list_answers(game_id, question_number).await?.len();
    let total_players = store.list_players(game.room_code.clone()).await?.len();
    let progress = AnswerProgress {
        answers_received,
        total_players,
        all_answered: answers_received >= total_players,
    };
    touch_room(&store, &game.room_code).await;

    state.sessions().broadcast_room(
        &game.room_code,
        ServerMessage::AnswerReceived {
            player_id: player.id,
            question_number,
            answers_received: progress.answers_received,
            total_players: progress.total_players,
            all_answered: progress.all_answered,
        },
    );
    debug!(
        game_id = %game_id,
        question = question_number,
        received = answers_received,
        total = total_players,
        "answer recorded"
    );
    Ok(progress)
}

/// Resolve every answer to `question_number` against `correct_answer`, score them and
/// announce results followed by the updated ledger.
///
/// Each answer is scored at most once: only the call that flips an answer from unresolved
/// applies its delta, so a repeated reveal reports the stored results without touching the
/// ledger. Revealing again with a key that contradicts a stored resolution is rejected.
pub async fn reveal_results(
    state: &SharedState,
    game_id: Uuid,
    requester: &str,
    question_number: u32,
    correct_answer: u32,
) -> Result<QuestionOutcome, ServiceError> {
    let store = state.require_store().await?;
    let game = require_game(&store, game_id).await?;

    let gate = state.room_gate(&game.room_code);
    let _guard = gate.lock().await;

    let requester = store
        .find_player(game.room_code.clone(), requester.to_owned())
        .await?
        .ok_or(ServiceError::PlayerNotInGame)?;
    if !requester.is_host {
        return Err(ServiceError::NotHost("reveal results"));
    }

    let game = require_game(&store, game_id).await?;
    if !game.status.is_active() {
        return Err(ServiceError::GameNotInProgress);
    }
    if question_number == 0 || question_number > game.total_questions {
        return Err(ServiceError::InvalidInput(format!(
            "question number must be between 1 and {}",
            game.total_questions
        )));
    }

    let resolved = store.list_answers(game_id, question_number).await?;
    let contradicts_key = resolved.iter().any(|answer| {
        answer
            .is_correct
            .is_some_and(|stored| stored != (answer.selected_answer == correct_answer))
    });
    if contradicts_key {
        return Err(ServiceError::QuestionAlreadyResolved(question_number));
    }

    // Close the question before scoring so no late answer slips in.
    store.advance_question(game_id, question_number + 1).await?;

    let points = state.config().points_per_correct_answer;
    let answers = store.list_answers(game_id, question_number).await?;
    let scores = store.list_scores(game_id).await?;

    let mut results = Vec::with_capacity(answers.len());
    for answer in answers {
        let is_correct = answer
            .is_correct
            .unwrap_or(answer.selected_answer == correct_answer);
        let points_awarded = if is_correct { points } else { 0 };

        if answer.is_correct.is_none() && store.resolve_answer(answer.id, is_correct).await? {
            store
                .increment_score(
                    game_id,
                    answer.player_id,
                    ScoreDelta {
                        points: points_awarded,
                        correct_answers: u32::from(is_correct),
                        total_answers: 1,
                        response_time_ms: answer.response_time_ms,
                    },
                )
                .await?;
        }

        let display_name = scores
            .iter()
            .find(|score| score.player_id == answer.player_id)
            .map(|score| score.display_name.clone())
            .unwrap_or_default();
        results.push(AnswerResult {
            player_id: answer.player_id,
            display_name,
            selected_answer: answer.selected_answer,
            is_correct,
            response_time: answer.response_time_ms,
            points_awarded,
        });
    }

    let scores = store.list_scores(game_id).await?;
    touch_room(&store, &game.room_code).await;

    let sessions = state.sessions();
    sessions.broadcast_room(
        &game.room_code,
        ServerMessage::QuestionResults {
            question_number,
            correct_answer,
            results: results.clone(),
        },
    );
    sessions.broadcast_room(
        &game.room_code,
        ServerMessage::ScoresUpdated {
            scores: scores.iter().map(ScoreView::from).collect(),
            question_number,
        },
    );
    info!(
        game_id = %game_id,
        question = question_number,
        answers = results.len(),
        "question results revealed"
    );

    Ok(QuestionOutcome { results, scores })
}

/// Current ledger of a game, highest total first.
pub async fn get_scores(state: &SharedState, game_id: Uuid) -> Result<Vec<ScoreEntity>, ServiceError> {
    let store = state.require_store().await?;
    require_game(&store, game_id).await?;
    Ok(store.list_scores(game_id).await?)
}

/// Id of the game currently running in `room_code`.
pub async fn active_game_id(state: &SharedState, room_code: &str) -> Result<Uuid, ServiceError> {
    let store = state.require_store().await?;
    store
        .find_active_game(room_code.to_owned())
        .await?
        .map(|game| game.id)
        .ok_or(ServiceError::GameNotInProgress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        lifecycle_service,
        testing::{TestClient, room_with_players, test_config},
    };

    async fn running_game(players: &[&str]) -> (SharedState, String, Uuid) {
        let (state, code) = room_with_players(test_config(), players).await;
        let game = lifecycle_service::start_game(&state, &code, "h")
            .await
            .unwrap()
            .completion
            .await
            .unwrap()
            .unwrap();
        (state, code, game.id)
    }

    fn score_of<'a>(scores: &'a [ScoreEntity], identity: &str) -> &'a ScoreEntity {
        scores.iter().find(|s| s.identity == identity).unwrap()
    }

    #[tokio::test]
    async fn concurrent_duplicate_answers_store_one() {
        let (state, _, game_id) = running_game(&["p"]).await;

        let (first, second) = tokio::join!(
            submit_answer(&state, game_id, "p", 1, 2, 1_000),
            submit_answer(&state, game_id, "p", 1, 3, 1_200),
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|r| matches!(r, Err(ServiceError::DuplicateAnswer(1))))
        );

        let store = state.require_store().await.unwrap();
        assert_eq!(store.list_answers(game_id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn progress_counts_members() {
        let (state, code, game_id) = running_game(&["p"]).await;
        let mut host = TestClient::joined(&state, &code, "h").await;

        let progress = submit_answer(&state, game_id, "p", 1, 2, 900).await.unwrap();
        assert_eq!(
            progress,
            AnswerProgress {
                answers_received: 1,
                total_players: 2,
                all_answered: false,
            }
        );
        let progress = submit_answer(&state, game_id, "h", 1, 0, 700).await.unwrap();
        assert!(progress.all_answered);

        let messages = host.drain();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            messages[1],
            ServerMessage::AnswerReceived {
                answers_received: 2,
                all_answered: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reveal_scores_each_answer_once() {
        let (state, code, game_id) = running_game(&["a", "b"]).await;
        let mut watcher = TestClient::joined(&state, &code, "b").await;

        submit_answer(&state, game_id, "a", 1, 2, 1_000).await.unwrap();
        submit_answer(&state, game_id, "b", 1, 1, 3_000).await.unwrap();
        watcher.drain();

        let err = reveal_results(&state, game_id, "a", 1, 2).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotHost(_)));

        let outcome = reveal_results(&state, game_id, "h", 1, 2).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        let a = score_of(&outcome.scores, "a");
        assert_eq!((a.total_score, a.correct_answers, a.total_answers), (100, 1, 1));
        let b = score_of(&outcome.scores, "b");
        assert_eq!((b.total_score, b.correct_answers, b.total_answers), (0, 0, 1));
        assert_eq!(outcome.scores[0].identity, "a");
        let host = score_of(&outcome.scores, "h");
        assert_eq!((host.total_score, host.correct_answers, host.total_answers), (0, 0, 0));
        assert_eq!(host.response_time_total_ms, 0);

        let messages = watcher.drain();
        assert!(matches!(messages[0], ServerMessage::QuestionResults { question_number: 1, .. }));
        assert!(matches!(messages[1], ServerMessage::ScoresUpdated { question_number: 1, .. }));

        // Revealing again reports the same results without scoring twice.
        let again = reveal_results(&state, game_id, "h", 1, 2).await.unwrap();
        assert_eq!(score_of(&again.scores, "a").total_score, 100);
        assert_eq!(score_of(&again.scores, "a").total_answers, 1);
    }

    #[tokio::test]
    async fn repeated_reveal_keeps_the_first_resolution() {
        let (state, _, game_id) = running_game(&["a"]).await;
        submit_answer(&state, game_id, "a", 1, 2, 1_000).await.unwrap();
        reveal_results(&state, game_id, "h", 1, 2).await.unwrap();

        let err = reveal_results(&state, game_id, "h", 1, 3).await.unwrap_err();
        assert!(matches!(err, ServiceError::QuestionAlreadyResolved(1)));

        let again = reveal_results(&state, game_id, "h", 1, 2).await.unwrap();
        assert_eq!(again.results.len(), 1);
        assert!(again.results[0].is_correct);
        assert_eq!(again.results[0].points_awarded, 100);
        let a = score_of(&again.scores, "a");
        assert_eq!((a.total_score, a.correct_answers, a.total_answers), (100, 1, 1));
    }

    #[tokio::test]
    async fn oversized_response_times_are_rejected() {
        let (state, _, game_id) = running_game(&["a"]).await;

        for response_time in [u64::MAX, MAX_RESPONSE_TIME_MS + 1] {
            let err = submit_answer(&state, game_id, "a", 1, 2, response_time)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }
        let store = state.require_store().await.unwrap();
        assert!(store.list_answers(game_id, 1).await.unwrap().is_empty());

        submit_answer(&state, game_id, "a", 1, 2, MAX_RESPONSE_TIME_MS)
            .await
            .unwrap();
        let outcome = reveal_results(&state, game_id, "h", 1, 2).await.unwrap();
        assert_eq!(
            score_of(&outcome.scores, "a").response_time_total_ms,
            MAX_RESPONSE_TIME_MS
        );
    }

    #[tokio::test]
    async fn answers_to_revealed_questions_are_rejected() {
        let (state, _, game_id) = running_game(&["p"]).await;
        reveal_results(&state, game_id, "h", 1, 0).await.unwrap();

        let err = submit_answer(&state, game_id, "p", 1, 0, 500).await.unwrap_err();
        assert!(matches!(err, ServiceError::QuestionAlreadyResolved(1)));
        submit_answer(&state, game_id, "p", 2, 0, 500).await.unwrap();
    }

    #[tokio::test]
    async fn submissions_are_validated() {
        let (state, code, game_id) = running_game(&["p"]).await;

        let err = submit_answer(&state, game_id, "p", 0, 0, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let err = submit_answer(&state, game_id, "p", 11, 0, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let err = submit_answer(&state, game_id, "stranger", 1, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PlayerNotInGame));
        let err = submit_answer(&state, Uuid::new_v4(), "p", 1, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::GameNotFound(_)));

        lifecycle_service::pause_game(&state, &code, "h", None)
            .await
            .unwrap();
        let err = submit_answer(&state, game_id, "p", 1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::GameNotInProgress));
    }

    #[tokio::test]
    async fn full_game_ranks_players_and_reports_stats() {
        let (state, code, game_id) = running_game(&["a", "b"]).await;

        for (question, answers) in [(1, [0, 0, 1]), (2, [2, 1, 2]), (3, [3, 3, 3])] {
            for (identity, selected) in ["h", "a", "b"].into_iter().zip(answers) {
                submit_answer(&state, game_id, identity, question, selected, 1_000)
                    .await
                    .unwrap();
            }
            let correct = match question {
                1 => 0,
                2 => 2,
                _ => 3,
            };
            reveal_results(&state, game_id, "h", question, correct)
                .await
                .unwrap();
        }

        let finished = lifecycle_service::end_game(&state, game_id, "h")
            .await
            .unwrap();
        let ranking: Vec<(&str, i64)> = finished
            .final_scores
            .iter()
            .map(|s| (s.identity.as_str(), s.total_score))
            .collect();
        assert_eq!(ranking[0], ("h", 300));
        assert_eq!(score_of(&finished.final_scores, "a").total_score, 200);
        assert_eq!(score_of(&finished.final_scores, "b").total_score, 200);
        assert_eq!(finished.stats.questions_played, 3);
        assert_eq!(finished.stats.total_answers, 9);
        assert_eq!(finished.stats.correct_answers, 7);

        assert_eq!(
            get_scores(&state, game_id).await.unwrap(),
            finished.final_scores
        );
        assert!(matches!(
            active_game_id(&state, &code).await,
            Err(ServiceError::GameNotInProgress)
        ));
    }
}
