//! The file-change-to-event pipeline.
//!
//! [`Pipeline`] owns everything that changes at runtime: the per-file
//! last-seen content, the [`SessionState`], and the [`ViewerHub`]. Both the
//! watcher task and viewer requests go through it.
//!
//! # Ordering
//!
//! Locks are always taken in the order tasks file → log file → session
//! state. File processing holds the file's lock from read to broadcast, so
//! notifications for one file are handled strictly one after another, while
//! the tasks file and the log file proceed independently. Broadcasts are
//! issued while the state lock is held, which is what lets a connecting
//! viewer receive its snapshot before any later update.
//!
//! # Self-Writes
//!
//! Whenever the pipeline writes a watched file it records the written content
//! as last-seen before releasing that file's lock, so the notification caused
//! by its own write is classified as a duplicate.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::broadcast::{ViewerHub, ViewerId};
use crate::classifier::{ChangeClassifier, Observation, WatchedFile};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::extract::{
    build_log_entries, check_narrative, diff_log_entries, parse_task, render_task_file,
    word_count, TasksChange,
};
use crate::state::SessionState;
use crate::tree::{build_tree, FileTree, MAX_DEPTH};
use crate::types::{ClientMessage, LogEntry, ServerMessage, TaskRecord, TaskSubmission};

/// Content written to a freshly created tasks file.
const TASKS_FILE_TEMPLATE: &str = "# TaskSync Tasks\n\n";

/// Counters reported by the status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub connections: usize,
    pub session: u64,
    pub check_count: u64,
}

/// A viewer that has been admitted to the hub.
#[derive(Debug)]
pub struct ViewerConnection {
    pub id: ViewerId,

    /// Outbound queue, pre-loaded with the initial snapshot.
    pub receiver: mpsc::Receiver<ServerMessage>,
}

/// Serialization point for every mutation of files and session state.
#[derive(Debug)]
pub struct Pipeline {
    tasks_path: PathBuf,
    log_path: PathBuf,
    sync_dir: PathBuf,
    workspace_dir: PathBuf,
    classifier: ChangeClassifier,
    state: Mutex<SessionState>,
    hub: ViewerHub,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            tasks_path: config.tasks_file(),
            log_path: config.log_file(),
            sync_dir: config.sync_dir.clone(),
            workspace_dir: config.workspace_dir.clone(),
            classifier: ChangeClassifier::new(),
            state: Mutex::new(SessionState::new()),
            hub: ViewerHub::new(),
        }
    }

    /// Directory holding both watched files.
    #[must_use]
    pub fn sync_dir(&self) -> &Path {
        &self.sync_dir
    }

    #[must_use]
    pub fn tasks_path(&self) -> &Path {
        &self.tasks_path
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    #[must_use]
    pub fn hub(&self) -> &ViewerHub {
        &self.hub
    }

    /// Creates the sync directory and seeds missing files.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the directory or a file cannot be created.
    pub async fn ensure_files(&self) -> Result<()> {
        fs::create_dir_all(&self.sync_dir)
            .await
            .map_err(|e| SyncError::io(&self.sync_dir, e))?;

        if !fs::try_exists(&self.tasks_path).await.unwrap_or(false) {
            write_file(&self.tasks_path, TASKS_FILE_TEMPLATE).await?;
            info!(path = %self.tasks_path.display(), "Created tasks file");
        }
        if !fs::try_exists(&self.log_path).await.unwrap_or(false) {
            write_file(&self.log_path, "").await?;
            info!(path = %self.log_path.display(), "Created log file");
        }
        Ok(())
    }

    /// Derives the session state from the files on disk.
    ///
    /// Seeds the last-seen content of both files, the baseline word count,
    /// the current task, and the log entries.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if an existing file cannot be read.
    pub async fn load_initial(&self) -> Result<()> {
        let mut tasks_seen = self.classifier.lock(WatchedFile::Tasks).await;
        let mut log_seen = self.classifier.lock(WatchedFile::Log).await;
        let mut state = self.state.lock().await;

        let tasks = read_optional(&self.tasks_path).await?.unwrap_or_default();
        let log = read_optional(&self.log_path).await?.unwrap_or_default();

        state.baseline_word_count = word_count(&tasks);
        state.current_task = parse_task(&tasks);
        let tag = state.session_tag();
        state.replace_entries(build_log_entries(&log, Some(&tag)));

        tasks_seen.record(tasks);
        log_seen.record(log);

        info!(
            tasks_file = %self.tasks_path.display(),
            log_file = %self.log_path.display(),
            baseline_word_count = state.baseline_word_count,
            log_entries = state.log_entries.len(),
            has_task = state.current_task.is_some(),
            "Loaded initial state"
        );
        if let Some(task) = &state.current_task {
            info!(
                category = %task.category,
                references = task.file_references.len(),
                "Current task: {}",
                preview(&task.description)
            );
        }
        Ok(())
    }

    /// Processes a notification for one watched file.
    ///
    /// Errors are logged and swallowed so the watcher keeps running.
    pub async fn handle_change(&self, file: WatchedFile) {
        let result = match file {
            WatchedFile::Tasks => self.process_tasks_file().await,
            WatchedFile::Log => self.process_log_file().await,
        };
        match result {
            Ok(true) => debug!(file = file.file_name(), "Change processed"),
            Ok(false) => debug!(file = file.file_name(), "No content change, skipping"),
            Err(err) => error!(file = file.file_name(), error = %err, "Failed to process change"),
        }
    }

    /// Re-reads the tasks file and applies it if it changed.
    ///
    /// Returns whether anything was processed.
    async fn process_tasks_file(&self) -> Result<bool> {
        let mut seen = self.classifier.lock(WatchedFile::Tasks).await;
        let Some(content) = read_optional(&self.tasks_path).await? else {
            debug!(path = %self.tasks_path.display(), "Tasks file missing");
            return Ok(false);
        };
        if seen.observe(content.clone()) == Observation::Duplicate {
            return Ok(false);
        }
        self.apply_tasks_change(&content).await?;
        Ok(true)
    }

    /// Applies new tasks file content.
    ///
    /// The caller holds the tasks file lock. Every outcome appends one
    /// narrative line to the log file; only a word count increase re-parses
    /// the task.
    async fn apply_tasks_change(&self, content: &str) -> Result<()> {
        let words = word_count(content);

        let mut log_seen = self.classifier.lock(WatchedFile::Log).await;
        let mut state = self.state.lock().await;

        let (check, change) = state.record_check(words);
        let (narrative, level) = check_narrative(change, check, words);
        info!(check, words, ?change, ?level, "Tasks file checked");

        if change == (TasksChange::Changed { increased: true }) {
            match parse_task(content) {
                Some(task) => {
                    if state.replace_task(task.clone()) {
                        info!(category = %task.category, "New task: {}", preview(&task.description));
                        self.hub.broadcast(ServerMessage::TaskUpdate(task)).await;
                    }
                }
                None => debug!("Tasks file has no description"),
            }
        }

        self.hub
            .broadcast(ServerMessage::TaskFileUpdate {
                content: content.to_string(),
            })
            .await;

        match self.append_log_line(&narrative).await {
            Ok(log) => {
                self.publish_log(&mut state, log_seen.content(), &log).await;
                log_seen.record(log);
            }
            Err(err) => warn!(error = %err, "Failed to append check narrative"),
        }
        Ok(())
    }

    /// Re-reads the log file and applies it if it changed.
    async fn process_log_file(&self) -> Result<bool> {
        let mut seen = self.classifier.lock(WatchedFile::Log).await;
        let Some(content) = read_optional(&self.log_path).await? else {
            debug!(path = %self.log_path.display(), "Log file missing");
            return Ok(false);
        };
        let Observation::Changed { previous } = seen.observe(content.clone()) else {
            return Ok(false);
        };

        let mut state = self.state.lock().await;
        self.publish_log(&mut state, &previous, &content).await;
        Ok(true)
    }

    /// Rebuilds the entry list from `current` and broadcasts it wholesale.
    async fn publish_log(&self, state: &mut SessionState, previous: &str, current: &str) {
        let new_messages = diff_log_entries(previous, current);
        if !new_messages.is_empty() {
            info!(count = new_messages.len(), messages = ?new_messages, "New log entries");
        }

        let tag = state.session_tag();
        let entries = build_log_entries(current, Some(&tag));
        state.replace_entries(entries.clone());
        self.hub.broadcast(ServerMessage::LogFileUpdate(entries)).await;
    }

    /// Appends one line to the log file and returns the resulting content.
    async fn append_log_line(&self, line: &str) -> Result<String> {
        let current = read_optional(&self.log_path).await?.unwrap_or_default();
        let mut addition = String::new();
        if !current.is_empty() && !current.ends_with('\n') {
            addition.push('\n');
        }
        addition.push_str(line);
        addition.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| SyncError::io(&self.log_path, e))?;
        file.write_all(addition.as_bytes())
            .await
            .map_err(|e| SyncError::io(&self.log_path, e))?;
        file.flush()
            .await
            .map_err(|e| SyncError::io(&self.log_path, e))?;

        Ok(current + &addition)
    }

    /// Handles a task submitted by a viewer.
    ///
    /// The submitter receives `task_submitted`, every other viewer receives
    /// `task_update`, and everyone receives the new tasks file content.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for an empty description, leaving
    /// the file and state untouched, or [`SyncError::Io`] if the tasks file
    /// cannot be written.
    pub async fn submit_task(&self, submitter: ViewerId, submission: TaskSubmission) -> Result<TaskRecord> {
        let description = submission.task.trim();
        if description.is_empty() {
            return Err(SyncError::validation("Task description is required"));
        }
        let category = submission.category();
        let references = submission.references();
        let content = render_task_file(category, description, &references);

        let mut seen = self.classifier.lock(WatchedFile::Tasks).await;
        write_file(&self.tasks_path, &content).await?;
        seen.record(content.clone());

        let task = TaskRecord::new(description, category, references);
        let mut state = self.state.lock().await;
        state.current_task = Some(task.clone());

        self.hub
            .send_to(submitter, ServerMessage::TaskSubmitted(task.clone()))
            .await;
        self.hub
            .broadcast_except(submitter, ServerMessage::TaskUpdate(task.clone()))
            .await;
        self.hub
            .broadcast(ServerMessage::TaskFileUpdate { content })
            .await;

        info!(viewer = %submitter, category = %task.category, "Task submitted: {}", preview(&task.description));
        Ok(task)
    }

    /// Empties the log file and the in-memory entries.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the log file cannot be truncated; state is
    /// left untouched in that case.
    pub async fn clear_log(&self) -> Result<()> {
        let mut seen = self.classifier.lock(WatchedFile::Log).await;
        write_file(&self.log_path, "").await?;
        seen.record(String::new());

        let mut state = self.state.lock().await;
        state.clear_entries();
        self.hub
            .broadcast(ServerMessage::LogCleared {
                message: "Log cleared successfully".to_string(),
            })
            .await;

        info!("Log cleared");
        Ok(())
    }

    /// Admits a new viewer.
    ///
    /// Pending log file changes are applied first so the snapshot reflects
    /// the file as it is now. The `initial_state` and `task_file_update`
    /// messages are queued before the viewer joins the hub, with the state
    /// lock held, so no broadcast can slip in between or ahead of them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if a watched file cannot be read.
    pub async fn connect_viewer(&self) -> Result<ViewerConnection> {
        let mut log_seen = self.classifier.lock(WatchedFile::Log).await;
        let mut state = self.state.lock().await;

        if let Some(log) = read_optional(&self.log_path).await? {
            if let Observation::Changed { previous } = log_seen.observe(log.clone()) {
                debug!("Applying pending log change before snapshot");
                self.publish_log(&mut state, &previous, &log).await;
            }
        }

        let tasks = read_optional(&self.tasks_path).await?;
        let (id, sender, receiver) = ViewerHub::open_channel();
        // The queue is fresh, so these cannot fail.
        let _ = sender.try_send(ServerMessage::InitialState(state.initial_state()));
        if let Some(content) = tasks {
            let _ = sender.try_send(ServerMessage::TaskFileUpdate { content });
        }
        self.hub.register(id, sender).await;

        let connections = self.hub.viewer_count().await;
        info!(viewer = %id, connections, "Viewer connected");
        Ok(ViewerConnection { id, receiver })
    }

    /// Removes a viewer from the broadcast set.
    pub async fn disconnect_viewer(&self, id: ViewerId) {
        self.hub.remove(id).await;
        let connections = self.hub.viewer_count().await;
        info!(viewer = %id, connections, "Viewer disconnected");
    }

    /// Dispatches one decoded viewer message.
    ///
    /// Failures are reported to that viewer as an `error` message.
    pub async fn handle_client_message(&self, viewer: ViewerId, message: ClientMessage) {
        let result = match message {
            ClientMessage::SubmitTask(submission) => self
                .submit_task(viewer, submission)
                .await
                .map(|_| ())
                .map_err(|e| (e, "submitting task")),
            ClientMessage::ClearLog => self.clear_log().await.map_err(|e| (e, "clearing log")),
            ClientMessage::GetFileTree => match self.file_tree().await {
                Ok(tree) => {
                    self.hub.send_to(viewer, ServerMessage::FileTree(tree)).await;
                    Ok(())
                }
                Err(e) => Err((e, "getting file tree")),
            },
            ClientMessage::Ping => {
                self.hub.send_to(viewer, ServerMessage::Pong).await;
                Ok(())
            }
        };

        if let Err((err, operation)) = result {
            if err.is_client_error() {
                debug!(viewer = %viewer, error = %err, "Rejected viewer request");
            } else {
                warn!(viewer = %viewer, error = %err, "Viewer request failed");
            }
            let message = err.viewer_message(operation);
            self.hub.send_to(viewer, ServerMessage::error(message)).await;
        }
    }

    /// Counters for the status query.
    pub async fn status(&self) -> PipelineStatus {
        let (session, check_count) = {
            let state = self.state.lock().await;
            (state.session, state.check_count)
        };
        PipelineStatus {
            connections: self.hub.viewer_count().await,
            session,
            check_count,
        }
    }

    /// A copy of the current session state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// The current task, if any.
    pub async fn current_task(&self) -> Option<TaskRecord> {
        self.state.lock().await.current_task.clone()
    }

    /// Reads up to `limit` entries, newest first, straight from the log file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the log file exists but cannot be read.
    pub async fn read_log_entries(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let Some(content) = read_optional(&self.log_path).await? else {
            return Ok(Vec::new());
        };
        let tag = self.state.lock().await.session_tag();
        let mut entries = build_log_entries(&content, Some(&tag));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Lists the workspace directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the workspace root cannot be read.
    pub async fn file_tree(&self) -> Result<FileTree> {
        let root = self.workspace_dir.clone();
        let listed = tokio::task::spawn_blocking(move || build_tree(&root, MAX_DEPTH))
            .await
            .map_err(|e| SyncError::io(&self.workspace_dir, std::io::Error::other(e)))?;
        listed.map_err(|e| SyncError::io(&self.workspace_dir, e))
    }
}

/// Reads a file, mapping "not found" to `None`.
async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Overwrites a file.
async fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .await
        .map_err(|e| SyncError::io(path, e))
}

/// First 50 characters of a description, for log lines.
fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 50;
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}
