//! Integration tests for the editor and event WebSocket endpoints.
//!
//! These tests validate the connected handshake, the editor protocol relay
//! in both directions, surface replacement, and event fan-out to several
//! clients.

mod common;

use std::time::Duration;

use codelab_widget::websocket::FilesPayload;
use codelab_widget::{EditorMessage, WidgetEvent};
use common::{host_with_main, start_server, start_widget, widget_config, FakeHost, USAGE_ID};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Starts a host, a widget and the widget server; returns the server's
/// WebSocket base URL and the host.
async fn spawn_test_server() -> (String, FakeHost) {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;
    let addr = start_server(handle).await;
    (format!("ws://{addr}/ws/widgets"), host)
}

async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text frame, answering pings on the way.
async fn receive_text(client: &mut WsClient) -> String {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

async fn receive_event(client: &mut WsClient) -> WidgetEvent {
    let text = receive_text(client).await;
    serde_json::from_str(&text).expect("Failed to parse event")
}

async fn receive_editor_message(client: &mut WsClient) -> EditorMessage {
    let text = receive_text(client).await;
    serde_json::from_str(&text).expect("Failed to parse editor message")
}

async fn send_json(client: &mut WsClient, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send frame");
}

// ============================================================================
// Event Stream Tests
// ============================================================================

/// A client receives a connected event naming the widget.
#[tokio::test]
async fn test_event_client_receives_connected_event() {
    let (base, _host) = spawn_test_server().await;
    let mut client = connect_client(&format!("{base}/{USAGE_ID}/events")).await;

    match receive_event(&mut client).await {
        WidgetEvent::Connected(payload) => assert_eq!(payload.usage_id, USAGE_ID),
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

/// Unknown widgets are refused before the upgrade.
#[tokio::test]
async fn test_unknown_widget_is_refused() {
    let (base, _host) = spawn_test_server().await;
    let result = connect_async(format!("{base}/missing/events")).await;
    assert!(result.is_err(), "Upgrade to an unknown widget should fail");
}

// ============================================================================
// Editor Protocol Tests
// ============================================================================

/// Ready makes the widget recreate every model; edits then flag the file.
#[tokio::test]
async fn test_editor_ready_syncs_models_and_edits_mark_dirty() {
    let (base, _host) = spawn_test_server().await;
    let mut events = connect_client(&format!("{base}/{USAGE_ID}/events")).await;
    assert!(matches!(
        receive_event(&mut events).await,
        WidgetEvent::Connected(_)
    ));

    let mut editor = connect_client(&format!("{base}/{USAGE_ID}/editor")).await;
    send_json(&mut editor, json!({"type": "editorReady"})).await;

    match receive_editor_message(&mut editor).await {
        EditorMessage::CreateModel {
            filename,
            content,
            language,
        } => {
            assert_eq!(filename, "main.py");
            assert_eq!(content, "print(1)");
            assert_eq!(language, "python");
        }
        other => panic!("Expected createModel, got: {other:?}"),
    }

    send_json(
        &mut editor,
        json!({"type": "contentChanged", "file": "main.py", "content": "print(2)"}),
    )
    .await;

    loop {
        if let WidgetEvent::FilesChanged(FilesPayload { files, .. }) =
            receive_event(&mut events).await
        {
            let main = files
                .iter()
                .find(|f| f.name == "main.py")
                .expect("main.py listed");
            if main.dirty {
                break;
            }
        }
    }
}

/// A second editor surface replaces the first, whose stream then ends.
#[tokio::test]
async fn test_second_editor_replaces_first() {
    let (base, _host) = spawn_test_server().await;
    let url = format!("{base}/{USAGE_ID}/editor");

    let mut first = connect_client(&url).await;
    send_json(&mut first, json!({"type": "editorReady"})).await;
    assert!(matches!(
        receive_editor_message(&mut first).await,
        EditorMessage::CreateModel { .. }
    ));

    let mut second = connect_client(&url).await;
    send_json(&mut second, json!({"type": "editorReady"})).await;
    assert!(matches!(
        receive_editor_message(&mut second).await,
        EditorMessage::CreateModel { .. }
    ));

    let ended = timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "First editor should be disconnected");
}

// ============================================================================
// Fan-out Tests
// ============================================================================

/// Every event client sees the same file tree change.
#[tokio::test]
async fn test_events_fan_out_to_all_clients() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;
    let addr = start_server(handle.clone()).await;
    let url = format!("ws://{addr}/ws/widgets/{USAGE_ID}/events");

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = connect_client(&url).await;
        assert!(matches!(
            receive_event(&mut client).await,
            WidgetEvent::Connected(_)
        ));
        clients.push(client);
    }

    handle
        .create_file("util.py", "")
        .await
        .expect("Failed to create file");

    for client in &mut clients {
        match receive_event(client).await {
            WidgetEvent::FilesChanged(payload) => {
                assert_eq!(payload.current_file.as_deref(), Some("util.py"));
                assert_eq!(payload.files.len(), 2);
            }
            other => panic!("Expected FilesChanged, got: {other:?}"),
        }
    }
}
