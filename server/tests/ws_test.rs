//! Integration tests for the viewer WebSocket protocol.
//!
//! These tests run the real router on a random port, with the file watcher
//! attached, and talk to it through tokio-tungstenite:
//! - Connect handshake (`initial_state` then `task_file_update`)
//! - Viewer requests (`ping`, `submit_task`, `clear_log`, `get_file_tree`)
//! - Malformed and unknown frames
//! - External file writes reaching connected viewers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tasksync_server::config::Config;
use tasksync_server::pipeline::Pipeline;
use tasksync_server::routes::{create_router, AppState};
use tasksync_server::types::ServerMessage;
use tasksync_server::watcher::FileWatcher;

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    _dir: TempDir,
    _watcher: FileWatcher,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a server over a fresh sync directory with the given tasks file.
async fn spawn_test_server(tasks: &str) -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config = Config::for_dir(dir.path().join("tasksync"));
    config.debounce = Duration::from_millis(20);

    std::fs::create_dir_all(&config.sync_dir).unwrap();
    std::fs::write(config.sync_dir.join("tasks.md"), tasks).unwrap();

    let pipeline = Arc::new(Pipeline::new(&config));
    let watcher = FileWatcher::bootstrap(Arc::clone(&pipeline), config.debounce)
        .await
        .unwrap();
    let app = create_router(AppState::new(Arc::clone(&pipeline)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        pipeline,
        _dir: dir,
        _watcher: watcher,
        handle,
    }
}

async fn connect(server: &TestServer) -> Viewer {
    let url = format!("ws://{}/ws", server.addr);
    let (ws, _response) = connect_async(&url).await.expect("WebSocket connect failed");
    ws
}

/// Connects and consumes the two handshake messages.
async fn connect_ready(server: &TestServer) -> Viewer {
    let mut ws = connect(server).await;
    assert_eq!(recv(&mut ws).await.kind(), "initial_state");
    assert_eq!(recv(&mut ws).await.kind(), "task_file_update");
    ws
}

async fn recv(ws: &mut Viewer) -> ServerMessage {
    loop {
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("invalid server message");
        }
    }
}

async fn send(ws: &mut Viewer, value: serde_json::Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Asserts that nothing arrives within a short window.
async fn assert_silent(ws: &mut Viewer) {
    let next = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected message: {next:?}");
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn connect_receives_snapshot_then_tasks_content() {
    let server = spawn_test_server("# Task\nwrite tests\n").await;
    let mut ws = connect(&server).await;

    let ServerMessage::InitialState(snapshot) = recv(&mut ws).await else {
        panic!("expected initial_state first");
    };
    assert_eq!(snapshot.session, 1);
    assert_eq!(snapshot.check_count, 0);
    assert_eq!(snapshot.baseline_word_count, 2);
    assert_eq!(snapshot.current_task.unwrap().description, "write tests");

    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::TaskFileUpdate {
            content: "# Task\nwrite tests\n".into()
        }
    );
}

#[tokio::test]
async fn initial_snapshot_is_limited_to_twenty_entries() {
    let server = spawn_test_server("").await;
    let log: String = (0..25).map(|i| format!("- entry {i}\n")).collect();
    tokio::fs::write(server.pipeline.log_path(), log).await.unwrap();

    let mut ws = connect(&server).await;
    let ServerMessage::InitialState(snapshot) = recv(&mut ws).await else {
        panic!("expected initial_state first");
    };
    assert_eq!(snapshot.log_entries.len(), 20);
    assert_eq!(snapshot.log_entries[0].message, "entry 24");
}

// ============================================================================
// Viewer requests
// ============================================================================

#[tokio::test]
async fn ping_gets_pong() {
    let server = spawn_test_server("").await;
    let mut ws = connect_ready(&server).await;

    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Pong);
}

#[tokio::test]
async fn payloadless_kinds_accept_empty_data() {
    let server = spawn_test_server("").await;
    let mut ws = connect_ready(&server).await;

    send(&mut ws, json!({"type": "ping", "data": {}})).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Pong);

    send(&mut ws, json!({"type": "get_file_tree", "data": {}})).await;
    assert_eq!(recv(&mut ws).await.kind(), "file_tree");

    send(&mut ws, json!({"type": "clear_log", "data": {}})).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::LogCleared {
            message: "Log cleared successfully".into()
        }
    );
}

#[tokio::test]
async fn unknown_kind_gets_error() {
    let server = spawn_test_server("").await;
    let mut ws = connect_ready(&server).await;

    send(&mut ws, json!({"type": "shutdown_server"})).await;
    let ServerMessage::Error { message } = recv(&mut ws).await else {
        panic!("expected error");
    };
    assert!(message.starts_with("Invalid message"));

    // The connection stays usable.
    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Pong);
}

#[tokio::test]
async fn malformed_json_gets_error() {
    let server = spawn_test_server("").await;
    let mut ws = connect_ready(&server).await;

    ws.send(Message::text("{not json".to_string())).await.unwrap();
    assert_eq!(recv(&mut ws).await.kind(), "error");
}

#[tokio::test]
async fn submit_task_reaches_submitter_and_others() {
    let server = spawn_test_server("").await;
    let mut submitter = connect_ready(&server).await;
    let mut other = connect_ready(&server).await;

    send(
        &mut submitter,
        json!({
            "type": "submit_task",
            "data": {"task": "Ship it", "category": "Release", "references": ["CHANGELOG.md"]}
        }),
    )
    .await;

    let ServerMessage::TaskSubmitted(task) = recv(&mut submitter).await else {
        panic!("expected task_submitted");
    };
    assert_eq!(task.description, "Ship it");
    assert_eq!(task.category, "Release");
    assert_eq!(task.file_references, vec!["CHANGELOG.md".to_string()]);
    assert_eq!(recv(&mut submitter).await.kind(), "task_file_update");

    assert_eq!(recv(&mut other).await, ServerMessage::TaskUpdate(task));
    assert_eq!(recv(&mut other).await.kind(), "task_file_update");

    let written = tokio::fs::read_to_string(server.pipeline.tasks_path())
        .await
        .unwrap();
    assert_eq!(written, "# Release\nShip it\n\nFile Reference:\n- CHANGELOG.md\n");

    // The watcher sees the server's own write and ignores it.
    assert_silent(&mut other).await;
}

#[tokio::test]
async fn empty_submission_is_rejected_for_submitter_only() {
    let server = spawn_test_server("# Task\nkeep me\n").await;
    let mut submitter = connect_ready(&server).await;
    let mut other = connect_ready(&server).await;

    send(
        &mut submitter,
        json!({"type": "submit_task", "data": {"task": "   "}}),
    )
    .await;

    assert_eq!(
        recv(&mut submitter).await,
        ServerMessage::error("Task description is required")
    );
    assert_silent(&mut other).await;

    let content = tokio::fs::read_to_string(server.pipeline.tasks_path())
        .await
        .unwrap();
    assert_eq!(content, "# Task\nkeep me\n");
}

#[tokio::test]
async fn clear_log_notifies_everyone() {
    let server = spawn_test_server("").await;
    tokio::fs::write(server.pipeline.log_path(), "- ✅ done\n")
        .await
        .unwrap();
    let mut first = connect_ready(&server).await;
    let mut second = connect_ready(&server).await;

    send(&mut first, json!({"type": "clear_log"})).await;

    let expected = ServerMessage::LogCleared {
        message: "Log cleared successfully".into(),
    };
    assert_eq!(recv(&mut first).await, expected);
    assert_eq!(recv(&mut second).await, expected);

    let content = tokio::fs::read_to_string(server.pipeline.log_path())
        .await
        .unwrap();
    assert!(content.is_empty());
}

#[tokio::test]
async fn get_file_tree_replies_with_tree() {
    let server = spawn_test_server("").await;
    let mut ws = connect_ready(&server).await;

    send(&mut ws, json!({"type": "get_file_tree"})).await;
    let ServerMessage::FileTree(tree) = recv(&mut ws).await else {
        panic!("expected file_tree");
    };
    assert!(tree.contains_key("tasksync"));
}

// ============================================================================
// External writes
// ============================================================================

#[tokio::test]
async fn external_task_rewrite_is_broadcast() {
    let server = spawn_test_server("# Task\nwrite tests\n").await;
    let mut ws = connect_ready(&server).await;

    tokio::fs::write(server.pipeline.tasks_path(), "# Task\nwrite tests and docs\n")
        .await
        .unwrap();

    let ServerMessage::TaskUpdate(task) = recv(&mut ws).await else {
        panic!("expected task_update");
    };
    assert_eq!(task.category, "Task");
    assert_eq!(task.description, "write tests and docs");
    assert_eq!(recv(&mut ws).await.kind(), "task_file_update");

    let ServerMessage::LogFileUpdate(entries) = recv(&mut ws).await else {
        panic!("expected log_file_update");
    };
    assert!(entries[0].message.contains("CHANGE DETECTED"));
}

#[tokio::test]
async fn external_log_append_is_broadcast() {
    let server = spawn_test_server("").await;
    tokio::fs::write(server.pipeline.log_path(), "- ✅ step one\n- ✅ step two\n")
        .await
        .unwrap();
    let mut ws = connect_ready(&server).await;

    tokio::fs::write(
        server.pipeline.log_path(),
        "- ✅ step one\n- ✅ step two\n- 🎉 step three\n",
    )
    .await
    .unwrap();

    let ServerMessage::LogFileUpdate(entries) = recv(&mut ws).await else {
        panic!("expected log_file_update");
    };
    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["🎉 step three", "✅ step two", "✅ step one"]);
}

#[tokio::test]
async fn disconnect_leaves_connection_set() {
    let server = spawn_test_server("").await;
    let ws = connect_ready(&server).await;
    assert_eq!(server.pipeline.status().await.connections, 1);

    drop(ws);
    let left = timeout(RECV_TIMEOUT, async {
        while server.pipeline.status().await.connections != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(left.is_ok(), "viewer should be removed after disconnect");
}
