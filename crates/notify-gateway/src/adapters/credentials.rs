//! Filesystem credential store.
//!
//! One file per credential entry inside a single directory. Writes go to a
//! hidden temporary file first and are renamed into place, so a crash never
//! leaves a half-written entry behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::domain::CredentialError;
use crate::ports::{CredentialStore, Credentials};

/// Credential directory on local disk
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    dir: PathBuf,
}

impl FsCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, CredentialError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(CredentialError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    async fn load(&self) -> Result<Credentials, CredentialError> {
        let mut entries = Credentials::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Temporary files from an interrupted save
            if name.starts_with('.') || !entry.file_type().await?.is_file() {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            entries.insert(name, bytes);
        }

        debug!(dir = %self.dir.display(), entries = entries.len(), "Loaded credentials");
        Ok(entries)
    }

    async fn save(&self, entries: &Credentials) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.dir).await?;
        for (name, bytes) in entries {
            let path = self.entry_path(name)?;
            let tmp = self.dir.join(format!(".{}.tmp", name));
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, &path).await?;
        }
        debug!(dir = %self.dir.display(), entries = entries.len(), "Saved credentials");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }

        info!(dir = %self.dir.display(), removed = removed, "Credentials cleared");
        Ok(())
    }
}
