// src/store/file.rs
//! File-backed store: one JSON document per key inside a data directory

use log::{debug, warn};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{PersistentStore, StoreError};

static DATA_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_data_dir_override(path: PathBuf) {
    let _ = DATA_DIR_OVERRIDE.set(path);
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        debug!("Opened file store at {}", dir.display());
        Ok(Self { dir })
    }

    /// Default location: `<data dir>/hangout-sync/<owner>`
    pub fn open_default(owner: &str) -> Result<Self, StoreError> {
        let mut dir = match DATA_DIR_OVERRIDE.get() {
            Some(dir) => dir.clone(),
            None => {
                let mut dir = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
                dir.push("hangout-sync");
                dir
            }
        };
        dir.push(owner);
        Self::open(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Keys carry user names, so hex-encode them into safe file names
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key)))
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            warn!("Empty document for key {}", key);
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        // Write to a sibling temp file and rename so readers never see half a document
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, &value)?;
        tmp.flush()?;
        tmp.persist(self.path_for(key)).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PersistentStoreExt;

    #[test]
    fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.save_list("alice-bob-messages", &[1, 2, 3]).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        let items: Vec<i32> = store.load_list("alice-bob-messages").unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_unsafe_key_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("../alice/evil-hangouts", serde_json::json!([true])).unwrap();
        assert_eq!(
            store.get("../alice/evil-hangouts").unwrap(),
            Some(serde_json::json!([true]))
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.remove("nothing").is_ok());
        assert!(store.get("nothing").unwrap().is_none());
    }
}
