use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::errors::LectureMaterialsError;
use crate::material::{CachedContent, MaterialId};

const COMMITTED_DIR: &str = "committed";
const STAGING_PREFIX: &str = "temp_";

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Write `data` for `id`; visible under its final path only once fully written.
    async fn store(&self, id: &MaterialId, data: Vec<u8>)
        -> Result<CachedContent, LectureMaterialsError>;
    async fn delete(&self, id: &MaterialId) -> Result<(), LectureMaterialsError>;
    /// Everything currently committed.
    async fn entries(&self) -> Result<Vec<CachedContent>, LectureMaterialsError>;
    /// Remove staging leftovers from interrupted writes. Returns how many were removed.
    async fn purge_staging(&self) -> Result<usize, LectureMaterialsError>;
}

/// Cache laid out as `<root>/committed/<hex id>` with per-write `<root>/temp_<random>/` staging.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    final_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        let final_dir = root.join(COMMITTED_DIR);
        Self { root, final_dir }
    }

    fn final_path(&self, id: &MaterialId) -> PathBuf {
        self.final_dir.join(id.file_name())
    }
}

/// One staged write. Either committed into the final directory or rolled back.
struct Staging {
    temp_dir: PathBuf,
}

impl Staging {
    async fn begin(root: &Path) -> Result<Self, LectureMaterialsError> {
        let random: [u8; 16] = rand::random();
        let temp_dir = root.join(format!("{STAGING_PREFIX}{}", hex::encode(random)));
        tokio::fs::create_dir_all(&temp_dir).await?;
        Ok(Self { temp_dir })
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), LectureMaterialsError> {
        let mut file = File::create(self.temp_dir.join(name)).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn commit(&self, name: &str, final_path: &Path) -> Result<(), LectureMaterialsError> {
        tokio::fs::rename(self.temp_dir.join(name), final_path).await?;
        // The file is in place; a stray empty staging dir is purged on next open.
        if let Err(e) = tokio::fs::remove_dir(&self.temp_dir).await {
            tracing::warn!("Error removing staging dir {}: {e}", self.temp_dir.display());
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), LectureMaterialsError> {
        tokio::fs::remove_dir_all(&self.temp_dir).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(
        &self,
        id: &MaterialId,
        data: Vec<u8>,
    ) -> Result<CachedContent, LectureMaterialsError> {
        tokio::fs::create_dir_all(&self.final_dir).await?;
        let name = id.file_name();
        let final_path = self.final_path(id);
        let staging = Staging::begin(&self.root).await?;

        let result = match staging.write(&name, &data).await {
            Ok(()) => staging.commit(&name, &final_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            staging.rollback().await.unwrap_or_else(|err| {
                tracing::warn!("Something went wrong on rollback for {id}: {err}");
            });
            return Err(e);
        }

        Ok(CachedContent {
            id: id.clone(),
            path: final_path,
            size: data.len() as u64,
        })
    }

    async fn delete(&self, id: &MaterialId) -> Result<(), LectureMaterialsError> {
        tokio::fs::remove_file(self.final_path(id)).await?;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CachedContent>, LectureMaterialsError> {
        let mut dir = match tokio::fs::read_dir(&self.final_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        while let Some(f) = dir.next_entry().await? {
            if !f.file_type().await?.is_file() {
                continue;
            }
            let file_name = f.file_name().to_string_lossy().into_owned();
            match MaterialId::from_file_name(&file_name) {
                Ok(id) => entries.push(CachedContent {
                    id,
                    path: f.path(),
                    size: f.metadata().await?.len(),
                }),
                Err(e) => tracing::warn!("Skipping unexpected cache file: {e}"),
            }
        }
        Ok(entries)
    }

    async fn purge_staging(&self) -> Result<usize, LectureMaterialsError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut purged = 0;
        while let Some(f) = dir.next_entry().await? {
            let is_staging = f.file_name().to_string_lossy().starts_with(STAGING_PREFIX);
            if is_staging && f.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(f.path()).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_commits_into_final_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        let id = MaterialId::new("slides-1");

        let content = storage.store(&id, b"deck".to_vec()).await.unwrap();

        assert_eq!(content.size, 4);
        assert_eq!(content.path, dir.path().join("committed").join(id.file_name()));
        assert_eq!(tokio::fs::read(&content.path).await.unwrap(), b"deck");
        assert_eq!(storage.purge_staging().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn entries_lists_committed_materials() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        assert!(storage.entries().await.unwrap().is_empty());

        storage.store(&"a".into(), vec![1, 2, 3]).await.unwrap();
        storage.store(&"b".into(), vec![4]).await.unwrap();
        tokio::fs::write(dir.path().join("committed").join("README"), b"x")
            .await
            .unwrap();

        let mut ids: Vec<_> = storage
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.id, c.size))
            .collect();
        ids.sort();
        assert_eq!(ids, vec![("a".into(), 3), ("b".into(), 1)]);
    }

    #[tokio::test]
    async fn delete_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        let err = storage.delete(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, LectureMaterialsError::Storage(e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_staging() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        let id = MaterialId::new("blocked");
        // A non-empty directory where the file should land makes the rename fail.
        let blocker = dir.path().join("committed").join(id.file_name());
        tokio::fs::create_dir_all(&blocker).await.unwrap();
        tokio::fs::write(blocker.join("keep"), b"x").await.unwrap();

        assert!(storage.store(&id, b"deck".to_vec()).await.is_err());
        assert_eq!(storage.purge_staging().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_staging_removes_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        let leftover = dir.path().join("temp_deadbeef");
        tokio::fs::create_dir_all(&leftover).await.unwrap();
        tokio::fs::write(leftover.join("partial"), b"half").await.unwrap();

        assert_eq!(storage.purge_staging().await.unwrap(), 1);
        assert!(!leftover.exists());
    }
}
