//! Persistence of the last connected sensor.
//!
//! The session remembers which sensor it last connected to so the app can
//! reconnect silently when it becomes active again.

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::data::LastDeviceRecord;
use crate::error::{Error, Result};

/// Storage for the last connected sensor.
pub trait DeviceStore: Send {
    /// Load the stored record, if any.
    fn load(&self) -> Result<Option<LastDeviceRecord>>;

    /// Replace the stored record.
    fn save(&mut self, record: &LastDeviceRecord) -> Result<()>;

    /// Forget the stored record.
    fn clear(&mut self) -> Result<()>;
}

/// In-memory store. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    record: Arc<Mutex<Option<LastDeviceRecord>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `record`.
    pub fn with_record(record: LastDeviceRecord) -> Self {
        Self {
            record: Arc::new(Mutex::new(Some(record))),
        }
    }
}

impl DeviceStore for MemoryStore {
    fn load(&self) -> Result<Option<LastDeviceRecord>> {
        Ok(self.record.lock().clone())
    }

    fn save(&mut self, record: &LastDeviceRecord) -> Result<()> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        *self.record.lock() = None;
        Ok(())
    }
}

/// Store keeping the record as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Use the file at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for JsonFileStore {
    fn load(&self) -> Result<Option<LastDeviceRecord>> {
        if !self.path.exists() {
            debug!("No last-device file at {}", self.path.display());
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        let record = serde_json::from_str(&contents).map_err(|e| Error::Storage {
            context: format!("Failed to parse {}: {}", self.path.display(), e),
        })?;

        Ok(Some(record))
    }

    fn save(&mut self, record: &LastDeviceRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, contents)?;

        info!(
            "Saved last device {} to {}",
            record.identifier,
            self.path.display()
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("rtemp-ble-{}", uuid::Uuid::new_v4()))
            .join("last_device.json")
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);

        let record = LastDeviceRecord::new("dev-1", None);
        store.save(&record).unwrap();

        let shared = store.clone();
        assert_eq!(shared.load().unwrap(), Some(record));

        store.clear().unwrap();
        assert_eq!(shared.load().unwrap(), None);
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let path = temp_path();
        let mut store = JsonFileStore::new(&path);
        assert_eq!(store.load().unwrap(), None);

        let record = LastDeviceRecord::new("AA:BB:CC:DD:EE:FF", Some("RTemp_1A2B".into()));
        store.save(&record).unwrap();
        assert!(path.exists());
        assert_eq!(JsonFileStore::new(&path).load().unwrap(), Some(record));

        store.clear().unwrap();
        assert!(!path.exists());
        // Clearing twice is fine.
        store.clear().unwrap();

        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_json_file_store_corrupt_file() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
