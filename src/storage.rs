//! Small durable key/value store: one JSON document per key inside a data
//! directory. Unreadable documents are dropped and reported as absent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AppError::validation(format!("invalid storage key '{}'", key)));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Reads and decodes `key`. Missing data yields `None`; corrupt data is
    /// removed and also yields `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_load(key) {
            Ok(value) => value,
            Err(AppError::CorruptStorage(_)) => {
                warn!("Discarding corrupt stored data under '{}'", key);
                if let Err(e) = self.remove(key) {
                    error!("Failed to remove corrupt data under '{}': {}", key, e);
                }
                None
            }
            Err(e) => {
                error!("Failed to load '{}': {}", key, e);
                None
            }
        }
    }

    pub fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|_| AppError::CorruptStorage(key.to_string()))
    }

    /// Serializes `value` and replaces whatever was stored under `key`.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key)?;
        let body = serde_json::to_vec(value)
            .map_err(|e| AppError::validation(format!("cannot serialize '{}': {}", key, e)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
