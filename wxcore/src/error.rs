use thiserror::Error;

/// A response did not have the shape the web protocol promises.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing field `{0}` in response")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unknown login status code {0:?}")]
    UnknownLoginStatus(String),

    #[error("login ticket request rejected with code {0}")]
    TicketRejected(String),

    #[error("session establishment rejected (ret={ret}): {message}")]
    LoginRejected { ret: i64, message: String },

    #[error("invalid login transition: {0}")]
    InvalidTransition(#[from] crate::login::InvalidTransition),

    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed XML body: {0}")]
    Xml(#[from] quick_xml::DeError),
}
