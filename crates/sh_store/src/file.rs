//! Plain-file backend: one file per key under a private directory.
//!
//! File names are the hex SHA-256 of the key, so arbitrary key strings of
//! any length map to safe, fixed-length names. Writes go to a temp file, are fsynced, then renamed over
//! the target, so a crash leaves either the old or the new value.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{backend::StorageBackend, error::StoreError};

fn file_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        debug!(dir = %dir.display(), "file key store ready");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }

    async fn sync_dir(&self) -> Result<(), StoreError> {
        #[cfg(unix)]
        fs::File::open(&self.dir).await?.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", file_name(key), uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        self.sync_dir().await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => self.sync_dir().await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
