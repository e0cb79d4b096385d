use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::room::{
        CreateRoomRequest, CreateRoomResponse, IdentityRequest, JoinRoomRequest,
        JoinRoomResponse, LeaveRoomResponse, PlayerView, RoomSnapshot, ShareMusicRequest,
    },
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Routes managing rooms and memberships before players open a live connection.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{code}", get(get_room))
        .route("/rooms/{code}/join", post(join_room))
        .route("/rooms/{code}/music", post(share_music))
        .route("/rooms/{code}/leave", post(leave_room))
}

/// Open a room under a fresh code with the caller as host.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = CreateRoomResponse),
        (status = 400, description = "Invalid payload"),
        (status = 503, description = "Storage unavailable or no free code"),
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), AppError> {
    let (details, host) = room_service::create_room(&state, payload).await?;
    let response = CreateRoomResponse {
        code: details.room.code.clone(),
        host: PlayerView::from(&host),
        room: details.snapshot(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Snapshot of an active room.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Four-letter room code")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "Unknown room"),
        (status = 409, description = "Room closed"),
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let details = room_service::get_room(&state, &code).await?;
    Ok(Json(details.snapshot()))
}

/// Join a waiting room, or rejoin one the identity already belongs to.
#[utoipa::path(
    post,
    path = "/rooms/{code}/join",
    tag = "rooms",
    params(("code" = String, Path, description = "Four-letter room code")),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Membership created or resumed", body = JoinRoomResponse),
        (status = 404, description = "Unknown room"),
        (status = 409, description = "Room full, closed or in game"),
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    let outcome = room_service::join_room(&state, &code, payload).await?;
    Ok(Json(JoinRoomResponse {
        player: PlayerView::from(&outcome.player),
        rejoined: outcome.rejoined,
        rejoined_game_in_progress: outcome.rejoined_game_in_progress,
    }))
}

/// Attach music preferences to a membership, marking it ready.
#[utoipa::path(
    post,
    path = "/rooms/{code}/music",
    tag = "rooms",
    params(("code" = String, Path, description = "Four-letter room code")),
    request_body = ShareMusicRequest,
    responses(
        (status = 200, description = "Preferences stored", body = PlayerView),
        (status = 404, description = "Unknown room or member"),
    )
)]
pub async fn share_music(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<ShareMusicRequest>>,
) -> Result<Json<PlayerView>, AppError> {
    let player =
        room_service::share_music_data(&state, &code, &payload.identity, payload.music_data)
            .await?;
    Ok(Json(PlayerView::from(&player)))
}

/// Leave a room. The host leaving closes it for everyone.
#[utoipa::path(
    post,
    path = "/rooms/{code}/leave",
    tag = "rooms",
    params(("code" = String, Path, description = "Four-letter room code")),
    request_body = IdentityRequest,
    responses(
        (status = 200, description = "Membership removed", body = LeaveRoomResponse),
        (status = 404, description = "Unknown room or member"),
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<IdentityRequest>>,
) -> Result<Json<LeaveRoomResponse>, AppError> {
    let room_closed = room_service::leave_room(&state, &code, &payload.identity).await?;
    Ok(Json(LeaveRoomResponse { room_closed }))
}
