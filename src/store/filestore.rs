use crate::store::SessionStorage;
use crate::store::error::{Result, StoreError};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use wxcore::session::Session;

/// Keeps the session as pretty-printed JSON in a single file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates the parent directory of `path` if needed.
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        // Temp file first, then renamed over the target.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileStore {
    async fn load(&self) -> Result<Option<Session>> {
        self.read_json(&self.path).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.write_json(&self.path, session).await
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxcore::session::Credentials;

    #[tokio::test]
    async fn session_survives_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested/session.json"))
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_none());

        let mut session = Session::new();
        session.credentials = Some(Credentials {
            skey: "@crypt_1".into(),
            wxsid: "sid".into(),
            wxuin: 77,
            pass_ticket: "pt".into(),
        });
        session.host = Some("wx2.qq.com".into());
        session.cookies.store_set_cookie("webwx_data_ticket=abc; Path=/");
        session.valid = true;

        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{not json").await.unwrap();
        let store = FileStore::new(&path).await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(StoreError::Serialization(_))
        ));
    }
}
