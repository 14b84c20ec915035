// Protocol types live in wxcore; re-exported for convenience
pub use wxcore::{ProtocolError, login as auth, session, sync as cursor, types};

pub mod backoff;
pub mod bot;
pub mod client;
pub mod config;
pub mod contact;
pub mod dispatch;
pub mod error;
pub mod login;
pub mod request;
pub mod send;
pub mod store;
pub mod sync;
pub mod upload;

#[doc(hidden)]
pub mod test_utils;

pub use bot::{Bot, BotBuilder, MessageContext};
pub use client::Client;
pub use config::{ClientConfig, ClientMode, DispatchMode};
pub use error::ClientError;
pub use send::{FILE_HELPER, SentMessage};
pub use upload::{MediaKind, UploadedMedia};
