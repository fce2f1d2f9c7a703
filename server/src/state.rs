//! In-memory session state derived from the watched files.
//!
//! [`SessionState`] is plain data. It is owned by the pipeline and only ever
//! mutated while the pipeline's state lock is held; viewers get clones via
//! [`SessionState::initial_state`].

use crate::extract::{classify_tasks_change, TasksChange};
use crate::types::{InitialState, LogEntry, TaskRecord};

/// Number of log entries included in a viewer's initial snapshot.
pub const SNAPSHOT_LOG_LIMIT: usize = 20;

/// Session counter value at process start.
const INITIAL_SESSION: u64 = 1;

/// Authoritative snapshot shared by every viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// The single current task, if any.
    pub current_task: Option<TaskRecord>,

    /// All log entries, newest first.
    pub log_entries: Vec<LogEntry>,

    /// Monitoring session number. Fixed for the process lifetime.
    pub session: u64,

    /// Number of distinct tasks file changes seen.
    pub check_count: u64,

    /// Word count at the start of the monitoring session.
    pub baseline_word_count: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_task: None,
            log_entries: Vec::new(),
            session: INITIAL_SESSION,
            check_count: 0,
            baseline_word_count: 0,
        }
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag attached to log entries of this session, e.g. `#1`.
    #[must_use]
    pub fn session_tag(&self) -> String {
        format!("#{}", self.session)
    }

    /// Counts a tasks file change and classifies its word count.
    ///
    /// Returns the new check number with the classification. The baseline
    /// moves only when it was zero.
    pub fn record_check(&mut self, word_count: usize) -> (u64, TasksChange) {
        self.check_count += 1;
        let change = classify_tasks_change(self.baseline_word_count, word_count);
        if change == TasksChange::EstablishedBaseline {
            self.baseline_word_count = word_count;
        }
        (self.check_count, change)
    }

    /// Replaces the current task.
    ///
    /// Returns `false` when the new task has the same content as the current
    /// one, in which case the stored record is left untouched.
    pub fn replace_task(&mut self, task: TaskRecord) -> bool {
        if let Some(current) = &self.current_task {
            if current.same_content(&task) {
                return false;
            }
        }
        self.current_task = Some(task);
        true
    }

    /// Replaces the whole entry list (already newest first).
    pub fn replace_entries(&mut self, entries: Vec<LogEntry>) {
        self.log_entries = entries;
    }

    pub fn clear_entries(&mut self) {
        self.log_entries.clear();
    }

    /// The snapshot sent to a newly connected viewer.
    #[must_use]
    pub fn initial_state(&self) -> InitialState {
        InitialState {
            current_task: self.current_task.clone(),
            log_entries: self
                .log_entries
                .iter()
                .take(SNAPSHOT_LOG_LIMIT)
                .cloned()
                .collect(),
            session: self.session,
            check_count: self.check_count,
            baseline_word_count: self.baseline_word_count,
        }
    }
}
