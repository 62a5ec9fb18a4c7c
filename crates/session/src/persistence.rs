//! Key-value persistence boundary for the session
//!
//! The session survives restarts by round-tripping each field through a
//! `KeyValueStore`. Absence of a key is the valid logged-out state, never an
//! error. Access is synchronous so hydration can complete before the first
//! request is dispatched.
//!
//! `FileStore` keeps a JSON object on disk, replaced wholesale on every
//! write. The file holds tokens, so it is only ever created 0600.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// External key-value persistence used by `SessionStore`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Apply several writes (`Some`) and removals (`None`) together.
    ///
    /// The default applies them one at a time; stores that can commit a batch
    /// in one step override it.
    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<()> {
        for (key, value) in changes {
            match value {
                Some(v) => self.set(key, v)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

/// Process-local store. Nothing survives a restart; used by tests and by
/// embedders that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// JSON file store.
///
/// The Mutex serializes writes; the in-memory map mirrors the file so reads
/// never touch the disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start, logged out).
    /// A file that exists but cannot be parsed is an error rather than a
    /// silent logout.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::SessionParse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), keys = entries.len(), "loaded session file");
            entries
        } else {
            info!(path = %path.display(), "session file not found, starting logged out");
            let entries = HashMap::new();
            write_atomic(&path, &entries)?;
            entries
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.apply(&[(key, None)])
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in changes {
            match value {
                Some(v) => {
                    entries.insert((*key).to_owned(), (*v).to_owned());
                }
                None => {
                    entries.remove(*key);
                }
            }
        }
        write_atomic(&self.path, &entries)
    }
}

/// Replace the session file in one rename.
///
/// The JSON goes into a uniquely named sibling created owner-only (0600), so
/// the tokens are never readable by other users, not even briefly.
fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".session")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::Io(format!("creating temp session file: {e}")))?;

    serde_json::to_writer_pretty(tmp.as_file_mut(), data)
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::Io(format!("syncing temp session file: {e}")))?;

    tmp.persist(path)
        .map_err(|e| Error::Io(format!("replacing session file: {}", e.error)))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
