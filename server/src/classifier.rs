//! Change classification for the two watched files.
//!
//! Filesystem notifications carry no payload and may arrive duplicated or
//! coalesced, so the pipeline re-reads the file on every notification and
//! asks the classifier whether the content actually moved. Each file keeps
//! its own last-seen content behind its own lock; holding that lock for the
//! whole processing step makes processing single-threaded per file while the
//! two files stay independent.
//!
//! Writes made by the server itself (task submission, log clearing, check
//! narratives) record the written content here before releasing the lock, so
//! the notification they trigger classifies as a duplicate.

use std::path::Path;

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

use crate::config::{LOG_FILE_NAME, TASKS_FILE_NAME};

/// One of the two files the server watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedFile {
    Tasks,
    Log,
}

impl WatchedFile {
    /// Maps a notification path to a watched file by basename.
    ///
    /// Any other file name yields `None`.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.file_name()?.to_str()? {
            TASKS_FILE_NAME => Some(Self::Tasks),
            LOG_FILE_NAME => Some(Self::Log),
            _ => None,
        }
    }

    /// The basename of this file.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Tasks => TASKS_FILE_NAME,
            Self::Log => LOG_FILE_NAME,
        }
    }
}

/// Result of comparing freshly read content against the last-seen content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Same bytes as last time; nothing to do.
    Duplicate,

    /// Content moved. Carries what was seen before.
    Changed { previous: String },
}

/// Last-seen content of a single file.
#[derive(Debug, Default)]
pub struct LastSeen {
    content: String,
}

impl LastSeen {
    /// Compares `current` with the stored content and stores it if different.
    pub fn observe(&mut self, current: String) -> Observation {
        if current == self.content {
            return Observation::Duplicate;
        }
        let previous = std::mem::replace(&mut self.content, current);
        Observation::Changed { previous }
    }

    /// Stores content the server wrote itself.
    pub fn record(&mut self, content: String) {
        self.content = content;
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Per-file last-seen state for both watched files.
#[derive(Debug, Default)]
pub struct ChangeClassifier {
    tasks: Mutex<LastSeen>,
    log: Mutex<LastSeen>,
}

impl ChangeClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state of one file.
    ///
    /// The guard must be held across the read, the comparison, and all
    /// processing that follows a change.
    pub async fn lock(&self, file: WatchedFile) -> MutexGuard<'_, LastSeen> {
        trace!(file = file.file_name(), "Locking last-seen state");
        match file {
            WatchedFile::Tasks => self.tasks.lock().await,
            WatchedFile::Log => self.log.lock().await,
        }
    }
}
