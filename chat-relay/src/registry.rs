use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    error::RegistryError,
    session::{SessionHandle, SessionId},
};

/// Sessions that have announced a name and not yet closed.
#[derive(Default)]
pub struct Registry {
    sessions: Mutex<BTreeMap<SessionId, Arc<SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session: Arc<SessionHandle>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let id = session.id();
        if sessions.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered { id });
        }
        sessions.insert(id, session);
        Ok(())
    }

    pub async fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().await.remove(&id)
    }

    /// Point-in-time copy of the membership, in session id order.
    pub async fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|session| session.name().unwrap_or_default().to_string())
            .collect()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let remaining = sessions.len();
        sessions.clear();
        remaining
    }
}
