pub mod sessions;
pub mod state_machine;
pub mod transitions;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};

use crate::{config::AppConfig, dao::quiz_store::QuizStore, error::ServiceError};

use self::sessions::SessionRegistry;

pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, live connections and per-room gates.
pub struct AppState {
    store: RwLock<Option<Arc<dyn QuizStore>>>,
    degraded: watch::Sender<bool>,
    config: Arc<AppConfig>,
    sessions: SessionRegistry,
    room_gates: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            room_gates: DashMap::new(),
        })
    }

    /// Construct a state with `store` already installed.
    pub fn with_store(config: AppConfig, store: Arc<dyn QuizStore>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            store: RwLock::new(Some(store)),
            degraded: degraded_tx,
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            room_gates: DashMap::new(),
        })
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn QuizStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`] when running without one.
    pub async fn require_store(&self) -> Result<Arc<dyn QuizStore>, ServiceError> {
        if *self.degraded.borrow() {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn QuizStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Gate serializing lifecycle-changing operations of one room.
    pub fn room_gate(&self, room_code: &str) -> Arc<Mutex<()>> {
        self.room_gates
            .entry(room_code.to_owned())
            .or_default()
            .clone()
    }

    /// Drop the gate of a room that no longer exists.
    pub fn forget_room_gate(&self, room_code: &str) {
        self.room_gates.remove(room_code);
    }

    #[cfg(test)]
    pub fn has_room_gate(&self, room_code: &str) -> bool {
        self.room_gates.contains_key(room_code)
    }
}
