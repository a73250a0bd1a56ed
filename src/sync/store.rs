// Persistence for per-session sync offsets and the chosen video

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::RacelogError;

/// What is remembered about a session's video sync between runs
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SyncRecord {
    pub session_id: String,
    pub offset_ms: f64,
    /// Identifying name of the chosen video
    pub video_name: Option<String>,
    /// Path the video can be re-acquired from
    #[serde(default)]
    pub video_path: Option<PathBuf>,
}

/// Storage for sync records keyed by session identity
pub trait SyncStore {
    fn save_record(&mut self, record: &SyncRecord) -> Result<(), RacelogError>;

    fn load_record(&self, session_id: &str) -> Result<Option<SyncRecord>, RacelogError>;

    fn delete_record(&mut self, session_id: &str) -> Result<(), RacelogError>;

    fn list_sessions(&self) -> Result<Vec<String>, RacelogError>;
}

/// One JSON file per session in a directory
pub struct FileBasedSyncStore {
    storage_path: PathBuf,
    cache: HashMap<String, SyncRecord>,
}

impl FileBasedSyncStore {
    pub fn new(storage_path: PathBuf) -> Result<Self, RacelogError> {
        if !storage_path.exists() {
            fs::create_dir_all(&storage_path)
                .map_err(|e| RacelogError::ConfigIOError { source: e })?;
        }
        Ok(Self {
            storage_path,
            cache: HashMap::new(),
        })
    }

    /// Store under the platform data directory
    pub fn new_default() -> Result<Self, RacelogError> {
        Self::new(Self::default_storage_path()?)
    }

    pub fn default_storage_path() -> Result<PathBuf, RacelogError> {
        let data_dir = dirs::data_dir().ok_or(RacelogError::NoConfigDir)?;
        Ok(data_dir.join("racelog").join("sync"))
    }

    fn file_path_for_session(&self, session_id: &str) -> PathBuf {
        self.storage_path
            .join(format!("{}.json", Self::encode_session_id(session_id)))
    }

    /// File stem for a session id. Lowercase ASCII letters and digits are kept,
    /// any other character becomes `_<hex code point>_`, so distinct ids never
    /// share a file.
    fn encode_session_id(session_id: &str) -> String {
        let mut encoded = String::with_capacity(session_id.len());
        for c in session_id.chars() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                encoded.push(c);
            } else {
                encoded.push_str(&format!("_{:x}_", c as u32));
            }
        }
        encoded
    }

    fn validate(session_id: &str) -> Result<(), RacelogError> {
        if session_id.trim().is_empty() {
            return Err(RacelogError::SyncStoreError {
                reason: "session id cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl SyncStore for FileBasedSyncStore {
    fn save_record(&mut self, record: &SyncRecord) -> Result<(), RacelogError> {
        Self::validate(&record.session_id)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| RacelogError::ConfigSerializeError { source: e })?;
        // Written next to the target and renamed into place
        let file_path = self.file_path_for_session(&record.session_id);
        let temp_path = file_path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(|e| RacelogError::ConfigIOError { source: e })?;
        fs::rename(&temp_path, &file_path).map_err(|e| RacelogError::ConfigIOError { source: e })?;

        debug!(
            "Saved sync record for session {} ({:.0}ms)",
            record.session_id, record.offset_ms
        );
        self.cache
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    fn load_record(&self, session_id: &str) -> Result<Option<SyncRecord>, RacelogError> {
        Self::validate(session_id)?;
        if let Some(record) = self.cache.get(session_id) {
            return Ok(Some(record.clone()));
        }
        let file_path = self.file_path_for_session(session_id);
        if !file_path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&file_path).map_err(|e| RacelogError::ConfigIOError { source: e })?;
        let record: SyncRecord = serde_json::from_str(&content)
            .map_err(|e| RacelogError::ConfigSerializeError { source: e })?;
        if record.session_id != session_id {
            return Err(RacelogError::SyncStoreError {
                reason: format!(
                    "{} holds session {}, not {}",
                    file_path.display(),
                    record.session_id,
                    session_id
                ),
            });
        }
        Ok(Some(record))
    }

    fn delete_record(&mut self, session_id: &str) -> Result<(), RacelogError> {
        Self::validate(session_id)?;
        let file_path = self.file_path_for_session(session_id);
        if file_path.exists() {
            fs::remove_file(&file_path).map_err(|e| RacelogError::ConfigIOError { source: e })?;
        }
        self.cache.remove(session_id);
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<String>, RacelogError> {
        let entries = fs::read_dir(&self.storage_path)
            .map_err(|e| RacelogError::ConfigIOError { source: e })?;
        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| RacelogError::ConfigIOError { source: e })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(record) = serde_json::from_str::<SyncRecord>(&content) {
                sessions.push(record.session_id);
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(session_id: &str, offset_ms: f64) -> SyncRecord {
        SyncRecord {
            session_id: session_id.to_string(),
            offset_ms,
            video_name: Some("onboard.mp4".to_string()),
            video_path: Some(PathBuf::from("/videos/onboard.mp4")),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        store.save_record(&record("Misano 2024-04-11 #3", 1520.)).unwrap();

        // a fresh store reads it back from disk
        let reopened = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        let loaded = reopened.load_record("Misano 2024-04-11 #3").unwrap();
        assert_eq!(loaded, Some(record("Misano 2024-04-11 #3", 1520.)));
        assert_eq!(reopened.load_record("other").unwrap(), None);
    }

    #[test]
    fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        store.save_record(&record("b", 1.)).unwrap();
        store.save_record(&record("a", 2.)).unwrap();
        assert_eq!(store.list_sessions().unwrap(), vec!["a", "b"]);

        store.delete_record("a").unwrap();
        assert_eq!(store.list_sessions().unwrap(), vec!["b"]);
        assert_eq!(store.load_record("a").unwrap(), None);
    }

    #[test]
    fn test_empty_session_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            store.save_record(&record(" ", 0.)),
            Err(RacelogError::SyncStoreError { .. })
        ));
    }

    #[test]
    fn test_similar_session_ids_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        store.save_record(&record("Race 1", 100.)).unwrap();
        store.save_record(&record("race_1", 999.)).unwrap();
        store.save_record(&record("race 1", 42.)).unwrap();

        let reopened = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.load_record("Race 1").unwrap(), Some(record("Race 1", 100.)));
        assert_eq!(reopened.load_record("race_1").unwrap(), Some(record("race_1", 999.)));
        assert_eq!(reopened.load_record("race 1").unwrap(), Some(record("race 1", 42.)));
        assert_eq!(reopened.list_sessions().unwrap(), vec!["Race 1", "race 1", "race_1"]);
    }

    #[test]
    fn test_record_for_another_session_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        store.save_record(&record("a", 1.)).unwrap();
        fs::rename(dir.path().join("a.json"), dir.path().join("b.json")).unwrap();

        let reopened = FileBasedSyncStore::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            reopened.load_record("b"),
            Err(RacelogError::SyncStoreError { .. })
        ));
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("racelog").join("sync");
        FileBasedSyncStore::new(nested.clone()).unwrap();
        assert!(nested.is_dir());
    }
}
