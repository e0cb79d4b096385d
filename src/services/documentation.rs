use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for TuneQuiz Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::share_music,
        crate::routes::rooms::leave_room,
        crate::routes::games::get_scores,
        crate::routes::games::end_game,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::CreateRoomResponse,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::JoinRoomResponse,
            crate::dto::room::ShareMusicRequest,
            crate::dto::room::IdentityRequest,
            crate::dto::room::LeaveRoomResponse,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::PlayerView,
            crate::dto::room::GameView,
            crate::dto::room::ScoreView,
            crate::dto::room::GameStats,
            crate::dto::room::GameFinishedResponse,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::AnswerResult,
            crate::error::ErrorKind,
            crate::state::state_machine::RoomStatus,
            crate::state::state_machine::GameStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room creation and membership"),
        (name = "games", description = "Game results and termination"),
        (name = "live", description = "WebSocket channel for players in a room"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/healthcheck",
            "/rooms",
            "/rooms/{code}",
            "/rooms/{code}/join",
            "/rooms/{code}/music",
            "/rooms/{code}/leave",
            "/games/{id}/scores",
            "/games/{id}/end",
            "/ws",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
