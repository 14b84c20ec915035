use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;
use wxcore::ProtocolError;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure: connect, TLS, timeout or reset.
    #[error("network error: {0}")]
    Network(#[source] anyhow::Error),

    /// The server answered with a non-2xx status.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server declared the session dead.
    #[error("session expired (code {code})")]
    SessionExpired { code: i64 },

    /// The operation needs a valid session and there is none.
    #[error("session is not valid")]
    SessionInvalid,

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("login was not confirmed within {0:?}")]
    AuthTimeout(Duration),

    #[error("login was cancelled on the phone")]
    LoginCancelled,

    #[error("invalid target {0:?}")]
    InvalidTarget(String),

    /// A `BaseResponse` with a non-zero `Ret` that does not mean expiry.
    #[error("server rejected the request (ret={ret}): {message}")]
    Server { ret: i64, message: String },

    #[error("client is already running")]
    AlreadyRunning,

    #[error("a login attempt is already in progress")]
    LoginInProgress,

    #[error("session storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ClientError {
    /// Failures worth another attempt after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::HttpStatus(code) => !is_auth_status(*code),
            _ => false,
        }
    }

    /// The server refused our credentials at the HTTP level.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::HttpStatus(code) if is_auth_status(*code))
    }
}

fn is_auth_status(code: u16) -> bool {
    code == 401 || code == 403
}
