use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

// ============================================================================
// CANCELLATION TOKEN
// ============================================================================

#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn check(&self) -> ServiceResult<()> {
        if self.is_cancelled() {
            Err(ServiceError::cancelled())
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// TASK REGISTRY
// ============================================================================

/// Tokens of in-flight background work, keyed by the id of what it works on.
#[derive(Default)]
pub struct TaskRegistry {
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        let mut active = self.active.write().await;
        if let Some(previous) = active.insert(id, token.clone()) {
            previous.cancel();
        }
        token
    }

    pub async fn cancel(&self, id: &Uuid) -> bool {
        let active = self.active.read().await;
        if let Some(token) = active.get(id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn unregister(&self, id: &Uuid) {
        let mut active = self.active.write().await;
        active.remove(id);
    }

    pub async fn is_active(&self, id: &Uuid) -> bool {
        self.active.read().await.contains_key(id)
    }
}
