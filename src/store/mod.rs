use crate::error::{Result, SyncError};
use crate::scheduler::ScheduledTask;
use crate::sync::SyncSettings;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Durable storage for named settings profiles and the scheduled-task
/// record. Profiles live as one JSON file each under `profiles/`; the
/// schedule is a single aggregate `tasks.json`. Files are pretty-printed
/// so they stay hand-editable.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir().join(format!("{name}.json"))
    }

    fn tasks_path(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    /// Save a profile, creating or overwriting it.
    pub async fn save(&self, name: &str, settings: &SyncSettings) -> Result<()> {
        validate_name(name)?;
        tokio::fs::create_dir_all(self.profiles_dir()).await?;
        let json = serde_json::to_string_pretty(settings).map_err(json_error)?;
        tokio::fs::write(self.profile_path(name), json).await?;
        debug!("Saved profile '{}'", name);
        Ok(())
    }

    /// Load a profile by name.
    pub async fn load(&self, name: &str) -> Result<SyncSettings> {
        validate_name(name)?;
        let data = match tokio::fs::read_to_string(self.profile_path(name)).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(format!("profile '{name}'")));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data).map_err(json_error)?)
    }

    /// Delete a profile by name.
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match tokio::fs::remove_file(self.profile_path(name)).await {
            Ok(()) => {
                debug!("Deleted profile '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(format!("profile '{name}'")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sorted names of all stored profiles. A store that has never saved
    /// anything lists as empty.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.profiles_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Persist the full scheduled-task list.
    pub async fn save_tasks(&self, tasks: &[ScheduledTask]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_string_pretty(tasks).map_err(json_error)?;
        tokio::fs::write(self.tasks_path(), json).await?;
        debug!("Saved {} scheduled tasks", tasks.len());
        Ok(())
    }

    /// Load the scheduled-task list. A missing record is an empty list;
    /// an unreadable one is an error for the caller to handle.
    pub async fn load_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let data = match tokio::fs::read_to_string(self.tasks_path()).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data).map_err(json_error)?)
    }
}

fn json_error(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

// Profile names become file stems, so path-like names are rejected
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(SyncError::InvalidName(name.to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(SyncError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample_settings() -> SyncSettings {
        SyncSettings {
            source: PathBuf::from("/data"),
            destination: PathBuf::from("/mnt/backup"),
            exclude_patterns: vec!["node_modules".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        store.save("daily", &sample_settings()).await.unwrap();
        let loaded = store.load("daily").await.unwrap();
        assert_eq!(loaded, sample_settings());
    }

    #[tokio::test]
    async fn save_overwrites_existing_profile() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        store.save("daily", &sample_settings()).await.unwrap();

        let mut updated = sample_settings();
        updated.delete = true;
        store.save("daily", &updated).await.unwrap();

        let loaded = store.load("daily").await.unwrap();
        assert!(loaded.delete);
    }

    #[tokio::test]
    async fn load_missing_profile_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        let err = store.load("ghost").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_missing_profile_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        let err = store.delete("ghost").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleted_profile_no_longer_loads() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        store.save("daily", &sample_settings()).await.unwrap();
        store.delete("daily").await.unwrap();
        assert!(store.load("daily").await.is_err());
    }

    #[tokio::test]
    async fn list_is_sorted_and_ignores_stray_files() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        store.save("beta", &sample_settings()).await.unwrap();
        store.save("alpha", &sample_settings()).await.unwrap();
        tokio::fs::write(dir.path().join("profiles").join("notes.txt"), "x")
            .await
            .unwrap();

        let names = store.list().await.unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn list_on_empty_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn path_like_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        for name in ["", ".", "..", "a/b", "a\\b"] {
            let err = store.save(name, &sample_settings()).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidName(_)), "name {name:?}");
        }
    }

    #[tokio::test]
    async fn missing_task_record_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.load_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_task_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("tasks.json"), "{ not json")
            .await
            .unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.load_tasks().await.is_err());
    }
}
