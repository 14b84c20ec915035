use crate::store::SessionStorage;
use crate::store::error::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use wxcore::session::Session;

/// Holds the session in memory only. Useful in tests and for hosts that
/// persist through their own means.
#[derive(Default)]
pub struct MemoryStore {
    session: Mutex<Option<Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionStorage for MemoryStore {
    async fn load(&self) -> Result<Option<Session>> {
        Ok(self.session.lock().await.clone())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        *self.session.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.session.lock().await = None;
        Ok(())
    }
}
