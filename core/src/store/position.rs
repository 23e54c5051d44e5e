//! Reading position records keyed by document.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::types::{DocumentId, ReadingPosition};

use super::Result;

const APP_QUALIFIER: &str = "com";
const APP_ORGANISATION: &str = "ReaderPipeline";
const APP_NAME: &str = "reader-pipeline";

/// Persists and retrieves the last reading position of each document.
pub trait PositionStore: Send + Sync {
    fn load(&self, document_id: &DocumentId) -> Result<Option<ReadingPosition>>;
    fn save(&self, position: &ReadingPosition) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PositionFile {
    entries: HashMap<String, PositionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PositionEntry {
    position: ReadingPosition,
    updated_ms: u64,
}

/// Single JSON file holding every document's position, rewritten atomically on save.
#[derive(Debug)]
pub struct JsonPositionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonPositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// Store under the platform data directory (`…/state/positions.json`).
    pub fn in_data_dir() -> Result<Self> {
        let dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANISATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("state"))
            .ok_or_else(|| anyhow!("unable to resolve application data directory"))?;
        Ok(Self::new(dir.join("positions.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<PositionFile> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing positions at {}", self.path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PositionFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_file(&self, file: &PositionFile) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            anyhow!("position path {} does not have a parent directory", self.path.display())
        })?;
        fs::create_dir_all(parent)
            .with_context(|| format!("creating position directory at {}", parent.display()))?;

        let data = serde_json::to_vec_pretty(file)?;
        let mut temp = NamedTempFile::new_in(parent)
            .with_context(|| format!("allocating temp file in {}", parent.display()))?;
        temp.write_all(&data)?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| anyhow::Error::from(err.error))?;
        Ok(())
    }
}

impl PositionStore for JsonPositionStore {
    fn load(&self, document_id: &DocumentId) -> Result<Option<ReadingPosition>> {
        let _guard = self.lock.lock();
        let file = self.read_file()?;
        Ok(file.entries.get(document_id.as_str()).map(|entry| entry.position.clone()))
    }

    fn save(&self, position: &ReadingPosition) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        file.entries.insert(
            position.document_id.as_str().to_string(),
            PositionEntry { position: position.clone(), updated_ms: now_ms() },
        );
        self.write_file(&file)
    }
}

/// Volatile store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    entries: Mutex<HashMap<DocumentId, ReadingPosition>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for MemoryPositionStore {
    fn load(&self, document_id: &DocumentId) -> Result<Option<ReadingPosition>> {
        Ok(self.entries.lock().get(document_id).cloned())
    }

    fn save(&self, position: &ReadingPosition) -> Result<()> {
        self.entries.lock().insert(position.document_id.clone(), position.clone());
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
