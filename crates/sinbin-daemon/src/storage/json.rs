//! JSON file storage implementation

use super::traits::*;
use async_trait::async_trait;
use sinbin_types::PersistedPunishments;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Punishments stored as a single JSON object.
///
/// Every save rewrites the whole file. Writes go to a `.tmp` sibling first
/// and are renamed into place so an interrupted write never leaves a
/// truncated store behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PunishmentStore for JsonFileStore {
    async fn load(&self) -> StorageResult<PersistedPunishments> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PersistedPunishments::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&contents)?)
    }

    async fn save(&self, punishments: &PersistedPunishments) -> StorageResult<()> {
        let json = serde_json::to_vec(punishments)?;

        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            records = punishments.len(),
            "Persisted punishments"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use sinbin_types::PersistedPunishment;

    fn temp_store() -> (PathBuf, JsonFileStore) {
        let dir = std::env::temp_dir().join(format!("sinbin_store_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(dir.join("muted.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let (dir, store) = temp_store();
        assert!(store.load().await.unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_save_rewrites_whole_file() {
        let (dir, store) = temp_store();

        let mut first = PersistedPunishments::new();
        first.insert("1 2".to_string(), PersistedPunishment { ends_at: 10 });
        first.insert("1 3".to_string(), PersistedPunishment { ends_at: 20 });
        store.save(&first).await.unwrap();

        let mut second = PersistedPunishments::new();
        second.insert("1 3".to_string(), PersistedPunishment { ends_at: 30 });
        store.save(&second).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"1 3":{"endsAt":30}}"#);
        assert_eq!(store.load().await.unwrap(), second);
        assert!(!store.tmp_path().exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let (dir, store) = temp_store();
        std::fs::write(store.path(), b"{not json").unwrap();

        assert!(matches!(
            store.load().await,
            Err(StorageError::Serialization(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
