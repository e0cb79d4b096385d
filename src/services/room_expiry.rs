use std::time::SystemTime;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{dto::ws::ServerMessage, error::ServiceError, state::SharedState};

/// Periodically purge rooms that saw no activity within the configured time-to-live.
pub async fn run(state: SharedState) {
    let mut ticker = interval(state.config().expiry_sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sweep_once(&state, SystemTime::now()).await {
            Ok(expired) if expired.is_empty() => debug!("no rooms expired"),
            Ok(expired) => info!(count = expired.len(), rooms = ?expired, "expired idle rooms"),
            Err(ServiceError::Degraded) => debug!("skipping room expiry while storage is degraded"),
            Err(err) => warn!(error = %err, "room expiry sweep failed"),
        }
    }
}

/// Delete every room idle since before `now - ttl`, telling any connection still attached.
/// Returns the deleted codes.
pub async fn sweep_once(state: &SharedState, now: SystemTime) -> Result<Vec<String>, ServiceError> {
    let store = state.require_store().await?;
    let cutoff = now
        .checked_sub(state.config().room_inactivity_ttl)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let expired = store.delete_stale_rooms(cutoff).await?;
    let sessions = state.sessions();
    for code in &expired {
        sessions.broadcast_room(
            code,
            ServerMessage::RoomClosed {
                reason: "expired".into(),
            },
        );
        sessions.close_room(code);
        state.forget_room_gate(code);
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::testing::{TestClient, room_with_players, test_config};

    #[tokio::test]
    async fn sweep_removes_only_idle_rooms() {
        let (state, code) = room_with_players(test_config(), &["p"]).await;
        let mut player = TestClient::joined(&state, &code, "p").await;

        let expired = sweep_once(&state, SystemTime::now()).await.unwrap();
        assert!(expired.is_empty());

        let later = SystemTime::now() + test_config().room_inactivity_ttl + Duration::from_secs(1);
        let expired = sweep_once(&state, later).await.unwrap();
        assert_eq!(expired, vec![code.clone()]);

        assert_eq!(
            player.drain(),
            vec![ServerMessage::RoomClosed {
                reason: "expired".into()
            }]
        );
        assert!(state.sessions().attachment(player.id).is_none());
        let store = state.require_store().await.unwrap();
        assert!(store.find_room(code.clone()).await.unwrap().is_none());
        assert!(store.list_players(code).await.unwrap().is_empty());
    }
}
