use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use crate::{domain::Credentials, utils::write_atomic, Result};

const CREDS_FILE: &str = "creds.json";

/// Where the session's authentication material lives between runs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credentials>>;
    async fn save(&self, creds: &Credentials) -> Result<()>;
    /// Drop everything; the next connection starts a fresh login.
    async fn wipe(&self) -> Result<()>;
}

/// Credential directory on disk (`<dir>/creds.json`).
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        let path = self.creds_path();
        let txt = match tokio::fs::read_to_string(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&txt)?))
    }

    async fn save(&self, creds: &Credentials) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let txt = serde_json::to_vec_pretty(creds)?;
        write_atomic(&self.creds_path(), &txt).await
    }

    async fn wipe(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                tracing::info!(dir = %self.dir.display(), "credentials wiped");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
