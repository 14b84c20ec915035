//! Persistence of sessions between process runs, used for hot login.

pub mod error;
pub mod filestore;
pub mod memory;

pub use error::StoreError;
pub use filestore::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use error::Result;
use wxcore::session::Session;

/// Somewhere a session can be parked and picked up again.
///
/// The format is up to the implementation; the client only hands over and
/// asks back the whole [`Session`].
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn load(&self) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}
