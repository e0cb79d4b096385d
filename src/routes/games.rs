use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::room::{GameFinishedResponse, IdentityRequest, ScoreView},
    error::AppError,
    services::{answer_service, lifecycle_service},
    state::SharedState,
};

/// Routes exposing game results.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games/{id}/scores", get(get_scores))
        .route("/games/{id}/end", post(end_game))
}

/// Current leaderboard of a game, highest total first.
#[utoipa::path(
    get,
    path = "/games/{id}/scores",
    tag = "games",
    params(("id" = String, Path, description = "Identifier of the game")),
    responses(
        (status = 200, description = "Leaderboard", body = [ScoreView]),
        (status = 404, description = "Unknown game"),
    )
)]
pub async fn get_scores(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ScoreView>>, AppError> {
    let scores = answer_service::get_scores(&state, id).await?;
    Ok(Json(scores.iter().map(ScoreView::from).collect()))
}

/// End a game on behalf of its host and return the final standings.
#[utoipa::path(
    post,
    path = "/games/{id}/end",
    tag = "games",
    params(("id" = String, Path, description = "Identifier of the game")),
    request_body = IdentityRequest,
    responses(
        (status = 200, description = "Game finished", body = GameFinishedResponse),
        (status = 403, description = "Requester is not the host"),
        (status = 404, description = "Unknown game"),
        (status = 409, description = "Game already finished"),
    )
)]
pub async fn end_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<IdentityRequest>>,
) -> Result<Json<GameFinishedResponse>, AppError> {
    let finished = lifecycle_service::end_game(&state, id, &payload.identity).await?;
    Ok(Json(GameFinishedResponse {
        game_id: finished.game.id,
        final_scores: finished.final_scores.iter().map(ScoreView::from).collect(),
        game_stats: finished.stats,
    }))
}
