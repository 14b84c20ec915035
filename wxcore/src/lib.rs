//! Protocol core of the WeChat Web client: wire types, response parsers,
//! the login state machine, the sync cursor and message classification.
//! Nothing in here performs I/O; the transport is reached through
//! [`net::HttpClient`].

pub mod error;
pub mod login;
pub mod net;
pub mod request;
pub mod script;
pub mod session;
pub mod sync;
pub mod types;
pub mod urls;

pub use error::ProtocolError;
