//! Durable marker store: the small set of keys that must survive a full
//! page reload (redirect cooldown stamp, intended return path, and the
//! bounded 401 diagnostic log).
//!
//! The store is a trait seam so the core stays testable; the file-backed
//! implementation writes one JSON document under the platform state
//! directory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Maximum retained 401 event timestamps; oldest evicted first.
pub const AUTH401_LOG_CAPACITY: usize = 50;

const MARKER_FILE_NAME: &str = "markers.json";
const STATE_DIR_NAME: &str = "wrenmail";

#[derive(Debug, thiserror::Error)]
pub enum MarkerStoreError {
    #[error("marker store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("marker store encode failure: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no platform state directory available")]
    NoStateDir,
}

/// Bounded ordered log of unix-ms timestamps at which a probe returned 401.
/// Purely diagnostic; capacity is fixed and eviction drops the oldest entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Auth401Log {
    events_unix_ms: VecDeque<i64>,
}

impl Auth401Log {
    pub fn record(&mut self, now_unix_ms: i64) {
        self.events_unix_ms.push_back(now_unix_ms);
        while self.events_unix_ms.len() > AUTH401_LOG_CAPACITY {
            self.events_unix_ms.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events_unix_ms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events_unix_ms.is_empty()
    }

    #[must_use]
    pub fn newest(&self) -> Option<i64> {
        self.events_unix_ms.back().copied()
    }

    #[must_use]
    pub fn oldest(&self) -> Option<i64> {
        self.events_unix_ms.front().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.events_unix_ms.iter().copied()
    }
}

/// The persisted document. Unknown fields from older builds are dropped on
/// rewrite; every field is optional so partial documents load cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_private_redirect_unix_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_after_login: Option<String>,
    #[serde(default, skip_serializing_if = "Auth401Log::is_empty")]
    pub auth401_events: Auth401Log,
}

pub trait MarkerStore: Send + Sync {
    fn load(&self) -> Result<Markers, MarkerStoreError>;
    fn store(&self, markers: &Markers) -> Result<(), MarkerStoreError>;
}

/// Load-modify-store helper; the layer is single-writer by design, so the
/// read-modify-write does not need store-level locking.
pub fn update_markers(
    store: &dyn MarkerStore,
    mutate: impl FnOnce(&mut Markers),
) -> Result<(), MarkerStoreError> {
    let mut markers = store.load()?;
    mutate(&mut markers);
    store.store(&markers)
}

/// In-memory implementation for tests and ephemeral embeddings.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    inner: Mutex<Markers>,
}

impl MemoryMarkerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn load(&self) -> Result<Markers, MarkerStoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn store(&self, markers: &Markers) -> Result<(), MarkerStoreError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *inner = markers.clone();
        Ok(())
    }
}

/// JSON file under the platform state directory. A missing file loads as the
/// default document; a corrupt file is logged and replaced on next store
/// rather than wedging the auth layer.
#[derive(Debug)]
pub struct FileMarkerStore {
    path: PathBuf,
}

impl FileMarkerStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Result<Self, MarkerStoreError> {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or(MarkerStoreError::NoStateDir)?;
        Ok(Self::new(base.join(STATE_DIR_NAME).join(MARKER_FILE_NAME)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MarkerStore for FileMarkerStore {
    fn load(&self) -> Result<Markers, MarkerStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Markers::default());
            }
            Err(err) => return Err(MarkerStoreError::Io(err)),
        };
        match serde_json::from_str(&raw) {
            Ok(markers) => Ok(markers),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    path = %self.path.display(),
                    "marker file unreadable, starting from defaults"
                );
                Ok(Markers::default())
            }
        }
    }

    fn store(&self, markers: &Markers) -> Result<(), MarkerStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(markers)?;
        std::fs::write(&self.path, encoded)?;
        Ok(())
    }
}
