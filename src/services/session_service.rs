use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::{
    dao::models::{PlayerEntity, PlayerUpdate},
    dto::{
        validation::{parse_room_code, require_non_empty},
        ws::ServerMessage,
    },
    error::ServiceError,
    services::room_service::{active_room, admit_new_member, load_details, lock_room, touch_room},
    state::{
        SharedState,
        sessions::{Attachment, ConnectionId},
    },
};

/// `join-room` payload.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub room_code: String,
    pub identity: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub reconnection_token: Option<String>,
    pub device_id: Option<String>,
    pub music_data: Option<serde_json::Value>,
}

/// `reconnect-to-room` payload.
#[derive(Debug, Clone)]
pub struct ReconnectRequest {
    pub room_code: String,
    pub identity: String,
    pub reconnection_token: String,
    pub device_id: String,
}

/// Check resume credentials: identity (already matched by lookup), token and device must all
/// match, and the membership must have been active within `window`.
pub fn verify_reconnection(
    player: &PlayerEntity,
    reconnection_token: &str,
    device_id: &str,
    now: SystemTime,
    window: Duration,
) -> Result<(), ServiceError> {
    let token_matches = player.reconnection_token.as_deref() == Some(reconnection_token);
    let device_matches = player.device_id.as_deref() == Some(device_id);
    if !token_matches || !device_matches {
        return Err(ServiceError::InvalidCredentials);
    }

    // A clock step backwards counts as fresh.
    let idle = now
        .duration_since(player.last_active_at)
        .unwrap_or(Duration::ZERO);
    if idle > window {
        return Err(ServiceError::ReconnectionExpired);
    }
    Ok(())
}

fn attachment_for(player: &PlayerEntity) -> Attachment {
    Attachment {
        room_code: player.room_code.clone(),
        identity: player.identity.clone(),
        player_id: player.id,
        display_name: player.display_name.clone(),
        is_host: player.is_host,
    }
}

/// Attach the connection to `player`, replay the room snapshot to it first, and announce it
/// to the rest of the room with `announcement`.
///
/// Runs under the room gate so no room update lands between the snapshot and the attach.
async fn attach_and_announce(
    state: &SharedState,
    connection: ConnectionId,
    player: &PlayerEntity,
    announcement: ServerMessage,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let (_guard, room) = lock_room(state, &store, &player.room_code).await?;
    let snapshot = load_details(&store, room).await?.snapshot();

    let previous = state.sessions().attach(
        connection,
        attachment_for(player),
        ServerMessage::RoomState { room: snapshot },
    );
    if let Some(previous) = previous.filter(|previous| previous.room_code != player.room_code) {
        state.sessions().broadcast_room(
            &previous.room_code,
            ServerMessage::PlayerDisconnected {
                player_id: previous.player_id,
                display_name: previous.display_name,
                is_host: previous.is_host,
            },
        );
    }

    state
        .sessions()
        .broadcast_except(&player.room_code, connection, announcement);
    Ok(())
}

/// Bind a live connection to its membership in `request.room_code`.
pub async fn handle_join(
    state: &SharedState,
    connection: ConnectionId,
    request: JoinRequest,
) -> Result<PlayerEntity, ServiceError> {
    require_non_empty("identity", &request.identity)?;
    let code = parse_room_code(&request.room_code)?;
    let store = state.require_store().await?;
    let room = active_room(&store, &code).await?;

    let existing = store
        .find_player(code.clone(), request.identity.clone())
        .await?;

    let player = match existing {
        Some(_) => {
            let update = PlayerUpdate {
                reconnection_token: request.reconnection_token.clone(),
                device_id: request.device_id.clone(),
                music_data: request.music_data.clone(),
                last_active_at: Some(SystemTime::now()),
                ..PlayerUpdate::default()
            };
            store
                .update_player(code.clone(), request.identity.clone(), update)
                .await?
                .ok_or_else(|| ServiceError::PlayerNotInRoom(code.clone()))?
        }
        None if state.config().allow_direct_join => {
            warn!(room = %code, identity = %request.identity, "creating membership over the live connection");
            // Status may have moved since the first read.
            let (_guard, room) = lock_room(state, &store, &room.code).await?;
            let display_name = request
                .display_name
                .clone()
                .unwrap_or_else(|| request.identity.clone());
            let admitted = admit_new_member(
                &store,
                &room,
                &request.identity,
                &display_name,
                request.avatar_url.clone(),
            )
            .await?;
            let update = PlayerUpdate {
                reconnection_token: request.reconnection_token.clone(),
                device_id: request.device_id.clone(),
                music_data: request.music_data.clone(),
                ..PlayerUpdate::default()
            };
            store
                .update_player(code.clone(), request.identity.clone(), update)
                .await?
                .unwrap_or(admitted)
        }
        None => return Err(ServiceError::PlayerNotInRoom(code)),
    };
    touch_room(&store, &code).await;

    let announcement = ServerMessage::PlayerConnected {
        player_id: player.id,
        display_name: player.display_name.clone(),
        is_host: player.is_host,
    };
    attach_and_announce(state, connection, &player, announcement).await?;

    info!(room = %code, identity = %player.identity, connection = %connection, "player connected");
    Ok(player)
}

/// Resume a membership with the credentials handed out on a previous join.
pub async fn handle_reconnect(
    state: &SharedState,
    connection: ConnectionId,
    request: ReconnectRequest,
) -> Result<PlayerEntity, ServiceError> {
    require_non_empty("identity", &request.identity)?;
    let code = parse_room_code(&request.room_code)?;
    let store = state.require_store().await?;
    active_room(&store, &code).await?;

    // Unknown identities get the same answer as wrong credentials.
    let player = store
        .find_player(code.clone(), request.identity.clone())
        .await?
        .ok_or(ServiceError::InvalidCredentials)?;

    let now = SystemTime::now();
    verify_reconnection(
        &player,
        &request.reconnection_token,
        &request.device_id,
        now,
        state.config().reconnect_window,
    )?;

    let update = PlayerUpdate {
        last_active_at: Some(now),
        ..PlayerUpdate::default()
    };
    let player = store
        .update_player(code.clone(), request.identity.clone(), update)
        .await?
        .ok_or(ServiceError::InvalidCredentials)?;
    touch_room(&store, &code).await;

    let announcement = ServerMessage::PlayerReconnected {
        player_id: player.id,
        display_name: player.display_name.clone(),
    };
    attach_and_announce(state, connection, &player, announcement).await?;

    info!(room = %code, identity = %player.identity, connection = %connection, "player reconnected");
    Ok(player)
}

/// Forget the connection and tell the room. The membership stays so a later reconnect can
/// resume it; store failures here are logged and swallowed.
pub async fn handle_disconnect(state: &SharedState, connection: ConnectionId) {
    let Some(attachment) = state.sessions().unregister(connection) else {
        debug!(connection = %connection, "unattached connection closed");
        return;
    };

    state.sessions().broadcast_room(
        &attachment.room_code,
        ServerMessage::PlayerDisconnected {
            player_id: attachment.player_id,
            display_name: attachment.display_name.clone(),
            is_host: attachment.is_host,
        },
    );
    info!(
        room = %attachment.room_code,
        identity = %attachment.identity,
        host = attachment.is_host,
        "player disconnected"
    );

    let store = match state.require_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(room = %attachment.room_code, error = %err, "cannot record disconnect time");
            return;
        }
    };
    let update = PlayerUpdate {
        last_active_at: Some(SystemTime::now()),
        ..PlayerUpdate::default()
    };
    if let Err(err) = store
        .update_player(attachment.room_code.clone(), attachment.identity.clone(), update)
        .await
    {
        warn!(room = %attachment.room_code, identity = %attachment.identity, error = %err, "failed to record disconnect time");
    }
}

/// Toggle readiness of the connection's member and tell the room.
pub async fn player_ready(
    state: &SharedState,
    connection: ConnectionId,
    is_ready: bool,
) -> Result<(), ServiceError> {
    let attachment = require_attachment(state, connection)?;
    let store = state.require_store().await?;
    let (_guard, _) = lock_room(state, &store, &attachment.room_code).await?;

    let update = PlayerUpdate {
        is_ready: Some(is_ready),
        last_active_at: Some(SystemTime::now()),
        ..PlayerUpdate::default()
    };
    store
        .update_player(
            attachment.room_code.clone(),
            attachment.identity.clone(),
            update,
        )
        .await?
        .ok_or_else(|| ServiceError::PlayerNotInRoom(attachment.room_code.clone()))?;
    touch_room(&store, &attachment.room_code).await;

    state.sessions().broadcast_room(
        &attachment.room_code,
        ServerMessage::PlayerReadyUpdate {
            identity: attachment.identity.clone(),
            is_ready,
        },
    );
    debug!(room = %attachment.room_code, identity = %attachment.identity, is_ready, "readiness changed");
    Ok(())
}

/// Membership the connection acts for, or [`ServiceError::NotAttached`].
pub fn require_attachment(
    state: &SharedState,
    connection: ConnectionId,
) -> Result<Attachment, ServiceError> {
    state
        .sessions()
        .attachment(connection)
        .ok_or(ServiceError::NotAttached)
}
