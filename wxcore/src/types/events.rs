use crate::session::Session;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LogoutReason {
    /// `logout()` was called.
    Requested,
    /// The server declared the session invalid.
    SessionExpired { code: i64 },
    /// The sync loop gave up after consecutive failures.
    RetriesExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "logout requested"),
            Self::SessionExpired { code } => write!(f, "session expired (code {code})"),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
        }
    }
}

/// Lifecycle events. Messages are delivered separately, through the
/// message dispatcher.
#[derive(Debug, Clone)]
pub enum Event {
    /// A ticket is ready to be shown to the user.
    LoginChallenge { ticket: String, qr_url: String },
    LoginScanned { avatar: Option<String> },
    LoginConfirmed(Box<Session>),
    ContactsChanged {
        upserted: Vec<String>,
        removed: Vec<String>,
    },
    LoggedOut(LogoutReason),
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        // Snapshot so a handler may register another one without deadlocking.
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler.handle_event(event);
        }
    }
}
