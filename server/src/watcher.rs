//! Filesystem watch source for the tasks and log files.
//!
//! The [`notify`] callback runs on the watcher's own thread, so it only maps
//! raw events to a [`WatchedFile`] and hands them to an internal channel.
//! A dispatcher task coalesces bursts through the [`Debouncer`] and then
//! schedules one processing pass per file on a dedicated worker task. Each
//! file has its own worker, so notifications for one file are processed in
//! arrival order while the two files never wait on each other.
//!
//! A worker queue holds at most one pending pass. Since every pass re-reads
//! the file, a notification arriving while a pass is already queued is folded
//! into it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{
    event::{CreateKind, ModifyKind},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::WatchedFile;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::pipeline::Pipeline;

/// Capacity of the channel between the notify callback and the dispatcher.
const RAW_EVENT_CAPACITY: usize = 1000;

/// Watches the sync directory and feeds changes into the [`Pipeline`].
///
/// Dropping the watcher stops both the OS watch and the background tasks.
#[derive(Debug)]
pub struct FileWatcher {
    /// Kept alive to maintain the watch subscription.
    _watcher: RecommendedWatcher,
    watch_dir: PathBuf,
    tasks: Vec<JoinHandle<()>>,
}

impl FileWatcher {
    /// Starts watching the pipeline's sync directory.
    ///
    /// A zero `debounce` processes every notification as it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SyncError::Watch`] if the OS watch cannot be
    /// created or attached. This is the one fatal startup condition.
    pub fn start(pipeline: Arc<Pipeline>, debounce: Duration) -> Result<Self> {
        let watch_dir = pipeline.sync_dir().to_path_buf();
        let (raw_tx, raw_rx) = mpsc::channel::<WatchedFile>(RAW_EVENT_CAPACITY);

        let (tasks_worker, tasks_tx) = spawn_worker(Arc::clone(&pipeline), WatchedFile::Tasks);
        let (log_worker, log_tx) = spawn_worker(pipeline, WatchedFile::Log);
        let workers = Workers {
            tasks: tasks_tx,
            log: log_tx,
        };
        let dispatcher = tokio::spawn(dispatch(raw_rx, debounce, workers));
        let tasks = vec![dispatcher, tasks_worker, log_worker];

        let watcher = match create_watcher(raw_tx, &watch_dir) {
            Ok(watcher) => watcher,
            Err(err) => {
                for task in &tasks {
                    task.abort();
                }
                return Err(err);
            }
        };

        info!(
            watch_dir = %watch_dir.display(),
            debounce_ms = debounce.as_millis(),
            "Started file watcher"
        );

        Ok(Self {
            _watcher: watcher,
            watch_dir,
            tasks,
        })
    }

    /// Runs the startup sequence around the watch.
    ///
    /// Creates missing files, attaches the watch, then loads the initial
    /// state. A write landing during the load is still delivered as a
    /// notification, and the classifier drops it if the load already saw it.
    /// A failed load is logged and the server starts with empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync files cannot be created or the watch
    /// cannot be attached.
    pub async fn bootstrap(pipeline: Arc<Pipeline>, debounce: Duration) -> Result<Self> {
        pipeline.ensure_files().await?;
        let watcher = Self::start(Arc::clone(&pipeline), debounce)?;
        if let Err(err) = pipeline.load_initial().await {
            warn!(error = %err, "Failed to load initial state, starting empty");
        }
        Ok(watcher)
    }

    /// The directory being watched.
    #[must_use]
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        debug!(watch_dir = %self.watch_dir.display(), "File watcher stopped");
    }
}

fn create_watcher(raw_tx: mpsc::Sender<WatchedFile>, watch_dir: &Path) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| handle_notify_event(res, &raw_tx),
        notify::Config::default(),
    )?;
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Runs on the notify thread; must not block.
fn handle_notify_event(res: notify::Result<Event>, raw_tx: &mpsc::Sender<WatchedFile>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };
    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for file in watched_files(&event) {
        if let Err(e) = raw_tx.try_send(file) {
            warn!(file = file.file_name(), error = %e, "Failed to queue file event");
        }
    }
}

/// The watched files an event concerns.
///
/// Reads, removals, directory events, and unrelated files yield nothing.
fn watched_files(event: &Event) -> Vec<WatchedFile> {
    let relevant = match event.kind {
        EventKind::Create(CreateKind::Folder) => false,
        EventKind::Create(_) | EventKind::Any => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) | EventKind::Remove(_) | EventKind::Other => false,
    };
    if !relevant {
        return Vec::new();
    }

    let mut files: Vec<WatchedFile> = event
        .paths
        .iter()
        .filter_map(|path| WatchedFile::from_path(path))
        .collect();
    files.dedup();
    files
}

/// Per-file processing queues.
#[derive(Debug, Clone)]
struct Workers {
    tasks: mpsc::Sender<()>,
    log: mpsc::Sender<()>,
}

impl Workers {
    fn schedule(&self, file: WatchedFile) {
        let queue = match file {
            WatchedFile::Tasks => &self.tasks,
            WatchedFile::Log => &self.log,
        };
        match queue.try_send(()) {
            Ok(()) => trace!(file = file.file_name(), "Scheduled processing pass"),
            Err(TrySendError::Full(())) => {
                trace!(file = file.file_name(), "Pass already queued");
            }
            Err(TrySendError::Closed(())) => {
                warn!(file = file.file_name(), "Worker stopped, dropping event");
            }
        }
    }
}

fn spawn_worker(pipeline: Arc<Pipeline>, file: WatchedFile) -> (JoinHandle<()>, mpsc::Sender<()>) {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let handle = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            pipeline.handle_change(file).await;
        }
        debug!(file = file.file_name(), "Worker shutting down");
    });
    (handle, tx)
}

async fn dispatch(mut raw_rx: mpsc::Receiver<WatchedFile>, debounce: Duration, workers: Workers) {
    if debounce.is_zero() {
        while let Some(file) = raw_rx.recv().await {
            workers.schedule(file);
        }
        debug!("Dispatcher shutting down");
        return;
    }

    let (out_tx, mut out_rx) = mpsc::channel::<(WatchedFile, ())>(16);
    let debouncer = Debouncer::new(debounce, out_tx);

    loop {
        tokio::select! {
            raw = raw_rx.recv() => match raw {
                Some(file) => {
                    if let Err(e) = debouncer.send(file, ()).await {
                        error!(error = %e, "Debouncer stopped");
                        break;
                    }
                }
                None => break,
            },
            Some((file, ())) = out_rx.recv() => workers.schedule(file),
        }
    }
    debug!("Dispatcher shutting down");
}
