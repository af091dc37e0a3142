//! On-disk session records: `base_dir/<id>/session.json`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::{SessionId, SessionRecord};

const RECORD_FILE: &str = "session.json";
const CONTEXT_DIR: &str = "context";

/// Directory holding one subdirectory per session.
#[derive(Debug, Clone)]
pub struct RecordDir {
    base: PathBuf,
}

impl RecordDir {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Per-session directory; also the session's default working directory.
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.base.join(id.as_str())
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(RECORD_FILE)
    }

    /// Load every persisted record, sorted by id.
    ///
    /// Directories without a record file are skipped. A record that exists but does not
    /// parse is corruption and fails the whole load.
    pub fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        fs::create_dir_all(&self.base).map_err(|e| StoreError::io(&self.base, e))?;

        let entries = fs::read_dir(&self.base).map_err(|e| StoreError::io(&self.base, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.base, e))?;
            let path = entry.path().join(RECORD_FILE);
            if !path.is_file() {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            let record: SessionRecord = serde_json::from_str(&content)
                .map_err(|source| StoreError::Corrupt { path, source })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Highest id that has a directory under the base, with or without a record.
    pub fn highest_allocated(&self) -> Result<u32, StoreError> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.base, e)),
        };
        Ok(entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| SessionId::parse(&entry.file_name().to_string_lossy()))
            .map(|id| id.number())
            .max()
            .unwrap_or(0))
    }

    /// Create the per-session directory and its `context/` subdirectory.
    pub fn prepare(&self, id: &SessionId) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(id);
        let context = dir.join(CONTEXT_DIR);
        fs::create_dir_all(&context).map_err(|e| StoreError::io(&context, e))?;
        Ok(dir)
    }

    /// Remove a directory created by [`prepare`](Self::prepare) for a session that never
    /// came to life.
    pub fn discard(&self, id: &SessionId) -> Result<(), StoreError> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    /// Write a record atomically (temp file + rename).
    pub fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.write(record, true)
    }

    /// [`save`](Self::save) without the fsync.
    pub fn save_unsynced(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.write(record, false)
    }

    fn write(&self, record: &SessionRecord, sync: bool) -> Result<(), StoreError> {
        let dir = self.session_dir(&record.id);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(RECORD_FILE);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            if sync {
                file.sync_all()?;
            }
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| StoreError::io(&path, e))
    }

    /// Delete a session's record. The directory and its context artifacts are kept.
    pub fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
