//! Game Lifecycle Manager: the only thing that spawns Sessions and the sole
//! owner of the active-games index (spec assigns that ownership here, not to
//! the Router or the Matchmaker).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::persistence::Persistence;
use crate::session::{self, SessionConfig, SessionHandle};

pub struct LifecycleManager {
    persistence: Arc<Persistence>,
    active: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl LifecycleManager {
    pub fn new(persistence: Arc<Persistence>) -> Self {
        Self {
            persistence,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Promotes a paired WaitingGame into a running Session. Takes `self` as
    /// an `Arc` because the spawned actor needs a handle back to `evict`
    /// itself when it terminates.
    pub async fn spawn_session(
        self: Arc<Self>,
        config: SessionConfig,
        timer_broadcast_interval: Duration,
    ) -> SessionHandle {
        let game_id = config.game_id;
        let handle = session::spawn(config, self.persistence.clone(), self.clone(), timer_broadcast_interval);
        self.active.lock().await.insert(game_id, handle.clone());
        handle
    }

    pub async fn get(&self, game_id: Uuid) -> Option<SessionHandle> {
        self.active.lock().await.get(&game_id).cloned()
    }

    pub async fn evict(&self, game_id: Uuid) {
        self.active.lock().await.remove(&game_id);
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
