//! Shared data types for the TaskSync server.
//!
//! This module defines the records derived from the watched files and the
//! closed set of messages exchanged with viewers. Viewer frames are decoded
//! once at the transport boundary into [`ClientMessage`]; everything the
//! server emits is a [`ServerMessage`].
//!
//! # Wire Format
//!
//! Every frame is a JSON object `{"type": <kind>, "data": <payload>}`.
//! Kinds without a payload (`ping`, `pong`, ...) omit `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::tree::FileTree;

/// Category used when a task has no heading or the submitter left it blank.
pub const DEFAULT_CATEGORY: &str = "Task";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
}

/// The single current task, parsed from the tasks file or submitted by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// `task-<unix millis>` of the creation time.
    pub id: String,

    pub description: String,

    pub category: String,

    /// Bullet entries listed under `File Reference:`.
    #[serde(default)]
    pub file_references: Vec<String>,

    pub status: TaskStatus,

    /// RFC 3339 UTC creation time.
    pub timestamp: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates an active task stamped with the current time.
    pub fn new(
        description: impl Into<String>,
        category: impl Into<String>,
        file_references: Vec<String>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            id: format!("task-{}", timestamp.timestamp_millis()),
            description: description.into(),
            category: category.into(),
            file_references,
            status: TaskStatus::Active,
            timestamp,
        }
    }

    /// Compares everything except the generated id and timestamp.
    ///
    /// Re-parsing unchanged file content yields records that are equal
    /// under this comparison.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.description == other.description
            && self.category == other.category
            && self.file_references == other.file_references
            && self.status == other.status
    }
}

/// Severity of a log entry, derived from its status glyph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Change,
    Monitoring,
}

/// One entry of the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `log-<unix millis>-<position>`.
    pub id: String,

    /// Line text with any leading bullet marker removed.
    pub message: String,

    pub timestamp: DateTime<Utc>,

    pub level: LogLevel,

    /// Session tag such as `#1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// A task submission from a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskSubmission {
    pub task: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub references: Vec<String>,
}

impl TaskSubmission {
    /// The category to write, falling back to [`DEFAULT_CATEGORY`].
    #[must_use]
    pub fn category(&self) -> &str {
        match self.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => category,
            _ => DEFAULT_CATEGORY,
        }
    }

    /// References with surrounding whitespace removed and blanks dropped.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.references
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Point-in-time view sent to a viewer right after it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialState {
    pub current_task: Option<TaskRecord>,

    /// Most recent entries, newest first.
    pub log_entries: Vec<LogEntry>,

    pub session: u64,

    pub check_count: u64,

    pub baseline_word_count: usize,
}

/// Messages sent from the server to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot sent once on connect.
    InitialState(InitialState),

    /// Full raw content of the tasks file.
    TaskFileUpdate { content: String },

    /// Full entry list of the log file, newest first.
    LogFileUpdate(Vec<LogEntry>),

    /// A new current task.
    TaskUpdate(TaskRecord),

    /// Confirmation sent only to the viewer that submitted the task.
    TaskSubmitted(TaskRecord),

    LogCleared { message: String },

    FileTree(FileTree),

    Error { message: String },

    Pong,
}

impl ServerMessage {
    /// Builds an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire name of this message kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialState(_) => "initial_state",
            Self::TaskFileUpdate { .. } => "task_file_update",
            Self::LogFileUpdate(_) => "log_file_update",
            Self::TaskUpdate(_) => "task_update",
            Self::TaskSubmitted(_) => "task_submitted",
            Self::LogCleared { .. } => "log_cleared",
            Self::FileTree(_) => "file_tree",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}

/// Messages sent from viewers to the server.
///
/// Frames use the same `{type, data}` shape as [`ServerMessage`]. Kinds
/// without a payload ignore any `data` they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SubmitTask(TaskSubmission),
    GetFileTree,
    ClearLog,
    Ping,
}

/// Raw frame before the kind is resolved.
#[derive(Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ClientMessage {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Protocol`] for malformed JSON, unknown kinds, or
    /// a kind whose payload is missing required fields.
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        let frame: ClientFrame = serde_json::from_str(text).map_err(invalid)?;
        match frame.kind.as_str() {
            "submit_task" => {
                let data = frame.data.unwrap_or(serde_json::Value::Null);
                serde_json::from_value(data)
                    .map(Self::SubmitTask)
                    .map_err(invalid)
            }
            "get_file_tree" => Ok(Self::GetFileTree),
            "clear_log" => Ok(Self::ClearLog),
            "ping" => Ok(Self::Ping),
            other => Err(SyncError::protocol(format!(
                "Invalid message: unknown message type `{other}`"
            ))),
        }
    }
}

fn invalid(err: serde_json::Error) -> SyncError {
    SyncError::protocol(format!("Invalid message: {err}"))
}
