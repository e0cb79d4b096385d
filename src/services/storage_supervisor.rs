use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{quiz_store::QuizStore, storage::StorageError},
    state::SharedState,
};

/// Delays driving the supervisor loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub health_poll_interval: Duration,
    /// In-place reconnects tried before the store is dropped and rebuilt.
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            health_poll_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
        }
    }
}

struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(timing: &SupervisorTiming) -> Self {
        Self {
            initial: timing.initial_delay,
            max: timing.max_delay,
            current: timing.initial_delay,
        }
    }

    async fn wait(&mut self) {
        sleep(self.current).await;
        self.current = (self.current * 2).min(self.max);
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Keep a storage backend installed in the shared state, flipping degraded mode while it is
/// unreachable. Runs forever.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn QuizStore>, StorageError>> + Send,
{
    run_with_timing(state, connect, SupervisorTiming::default()).await;
}

/// [`run`] with explicit delays.
pub async fn run_with_timing<F, Fut>(state: SharedState, mut connect: F, timing: SupervisorTiming)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn QuizStore>, StorageError>> + Send,
{
    let mut backoff = Backoff::new(&timing);

    loop {
        match connect().await {
            Ok(store) => {
                state.set_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                backoff.reset();

                watch_health(&state, store.as_ref(), &timing).await;
                warn!("storage lost; rebuilding the connection");
                backoff.wait().await;
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                state.update_degraded(true).await;
                backoff.wait().await;
            }
        }
    }
}

/// Poll the store until it fails and cannot be revived in place.
async fn watch_health(state: &SharedState, store: &dyn QuizStore, timing: &SupervisorTiming) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false).await;
                }
                sleep(timing.health_poll_interval).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !reconnect_in_place(state, store, timing).await {
                    warn!("exhausted storage reconnect attempts; staying in degraded mode");
                    return;
                }
                state.update_degraded(false).await;
                sleep(timing.health_poll_interval).await;
            }
        }
    }
}

async fn reconnect_in_place(
    state: &SharedState,
    store: &dyn QuizStore,
    timing: &SupervisorTiming,
) -> bool {
    let mut backoff = Backoff::new(timing);

    for attempt in 0..timing.max_reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "storage reconnect failed; entering degraded mode");
                    state.update_degraded(true).await;
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                backoff.wait().await;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        dao::quiz_store::memory::MemoryQuizStore, services::testing::test_config, state::AppState,
    };

    fn fast() -> SupervisorTiming {
        SupervisorTiming {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            health_poll_interval: Duration::from_millis(1),
            max_reconnect_attempts: 2,
        }
    }

    #[tokio::test]
    async fn installs_store_after_failed_attempts() {
        let state = AppState::new(test_config());
        assert!(state.require_store().await.is_err());

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let supervisor = tokio::spawn(run_with_timing(
            state.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StorageError::unavailable(
                            "connect".into(),
                            std::io::Error::other("refused"),
                        ))
                    } else {
                        Ok(Arc::new(MemoryQuizStore::new()) as Arc<dyn QuizStore>)
                    }
                }
            },
            fast(),
        ));

        let mut degraded = state.degraded_watcher();
        tokio::time::timeout(Duration::from_secs(2), degraded.wait_for(|value| !*value))
            .await
            .unwrap()
            .unwrap();
        assert!(state.require_store().await.is_ok());
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        supervisor.abort();
    }
}
