//! UI event types, broadcasting and the widget WebSocket endpoints.
//!
//! Each widget owns an [`EventBroadcaster`]. Everything the learner sees
//! (program output, previews, feedback, alerts, the file tree and test
//! results) is published as a [`WidgetEvent`] and forwarded to every
//! client connected to `/ws/widgets/{id}/events`.
//!
//! The editor surface talks to the widget over `/ws/widgets/{id}/editor`.
//! Text frames in both directions carry the JSON editor protocol of
//! [`crate::editor::EditorMessage`].
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects
//! - `output` - Displayed stdout and stderr of a submission
//! - `preview` - Sanitized markup for the preview pane
//! - `feedback` / `feedback_error` - AI feedback or its inline failure
//! - `tab_switched` - The active tab changed
//! - `alert` - A user-facing error message
//! - `submitting` - The submit button's busy flag
//! - `files_changed` - The file tree changed
//! - `test_results` - A test run finished
//!
//! # Example
//!
//! ```
//! use codelab_widget::websocket::{EventBroadcaster, Tab, WidgetEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(WidgetEvent::tab_switched(Tab::Output));
//! assert_eq!(
//!     receiver.recv().await.unwrap(),
//!     WidgetEvent::tab_switched(Tab::Output)
//! );
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use codelab_report::TestReport;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{ApiError, WidgetRegistry};
use crate::language::FileType;
use crate::project::ProjectState;
use crate::widget::WidgetHandle;

// ============================================================================
// Event Payloads
// ============================================================================

/// Output panel tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    /// Program output or markup preview.
    Output,
    /// AI feedback.
    Feedback,
    /// Test-case results.
    TestResults,
}

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Widget the client attached to.
    pub usage_id: String,
}

/// Payload for the `output` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPayload {
    /// Displayed standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Payload for the `preview` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewPayload {
    /// Sanitized HTML.
    pub html: String,
}

/// Payload for the `feedback` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    /// Markdown feedback.
    pub markdown: String,
}

/// Payload for the `feedback_error` and `alert` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Human-readable message.
    pub message: String,
}

/// Payload for the `tab_switched` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabPayload {
    /// Newly active tab.
    pub tab: Tab,
}

/// Payload for the `submitting` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittingPayload {
    /// Whether a submission is pending.
    pub active: bool,
}

/// One row of the file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Filename.
    pub name: String,
    /// File type tag.
    pub file_type: FileType,
    /// Icon class.
    pub icon: String,
    /// Whether the editor holds unsaved content.
    pub dirty: bool,
}

/// Payload for the `files_changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesPayload {
    /// Files in name order.
    pub files: Vec<FileEntry>,
    /// Active file.
    pub current_file: Option<String>,
}

impl FilesPayload {
    /// Builds the file tree of a project.
    #[must_use]
    pub fn from_project(project: &ProjectState) -> Self {
        let files = project
            .files()
            .iter()
            .map(|(name, record)| FileEntry {
                name: name.clone(),
                file_type: record.file_type,
                icon: record.file_type.icon_class().to_string(),
                dirty: project.is_dirty(name),
            })
            .collect();
        Self {
            files,
            current_file: project.current_file().map(str::to_string),
        }
    }
}

/// Payload for the `test_results` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultsPayload {
    /// Results and summary.
    pub report: TestReport,
    /// Rendered results panel.
    pub markdown: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// UI events of one widget.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum WidgetEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Program output.
    Output(OutputPayload),
    /// Markup preview.
    Preview(PreviewPayload),
    /// AI feedback.
    Feedback(FeedbackPayload),
    /// The feedback request failed.
    FeedbackError(MessagePayload),
    /// The active tab changed.
    TabSwitched(TabPayload),
    /// A user-facing error.
    Alert(MessagePayload),
    /// The submission busy flag changed.
    Submitting(SubmittingPayload),
    /// The file tree changed.
    FilesChanged(FilesPayload),
    /// A test run finished.
    TestResults(TestResultsPayload),
}

impl WidgetEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub fn connected(usage_id: impl Into<String>) -> Self {
        Self::Connected(ConnectedPayload {
            usage_id: usage_id.into(),
        })
    }

    /// Creates an `Output` event.
    #[must_use]
    pub fn output(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Output(OutputPayload {
            stdout: stdout.into(),
            stderr: stderr.into(),
        })
    }

    /// Creates a `Preview` event.
    #[must_use]
    pub fn preview(html: impl Into<String>) -> Self {
        Self::Preview(PreviewPayload { html: html.into() })
    }

    /// Creates a `Feedback` event.
    #[must_use]
    pub fn feedback(markdown: impl Into<String>) -> Self {
        Self::Feedback(FeedbackPayload {
            markdown: markdown.into(),
        })
    }

    /// Creates a `FeedbackError` event.
    #[must_use]
    pub fn feedback_error(message: impl Into<String>) -> Self {
        Self::FeedbackError(MessagePayload {
            message: message.into(),
        })
    }

    /// Creates a `TabSwitched` event.
    #[must_use]
    pub const fn tab_switched(tab: Tab) -> Self {
        Self::TabSwitched(TabPayload { tab })
    }

    /// Creates an `Alert` event.
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self::Alert(MessagePayload {
            message: message.into(),
        })
    }

    /// Creates a `Submitting` event.
    #[must_use]
    pub const fn submitting(active: bool) -> Self {
        Self::Submitting(SubmittingPayload { active })
    }

    /// Creates a `FilesChanged` event for a project.
    #[must_use]
    pub fn files_changed(project: &ProjectState) -> Self {
        Self::FilesChanged(FilesPayload::from_project(project))
    }

    /// Creates a `TestResults` event.
    #[must_use]
    pub const fn test_results(report: TestReport, markdown: String) -> Self {
        Self::TestResults(TestResultsPayload { report, markdown })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Output(_) => "output",
            Self::Preview(_) => "preview",
            Self::Feedback(_) => "feedback",
            Self::FeedbackError(_) => "feedback_error",
            Self::TabSwitched(_) => "tab_switched",
            Self::Alert(_) => "alert",
            Self::Submitting(_) => "submitting",
            Self::FilesChanged(_) => "files_changed",
            Self::TestResults(_) => "test_results",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts widget events to all connected clients.
///
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<WidgetEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber. A subscriber that falls behind receives
    /// `Lagged` and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event. Returns the number of subscribers reached.
    pub fn send(&self, event: WidgetEvent) -> usize {
        debug!(event = event.event_name(), "Broadcasting widget event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handlers
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Upgrade handler for `/ws/widgets/{id}/events`.
pub async fn events_ws_handler(
    ws: WebSocketUpgrade,
    Path(usage_id): Path<String>,
    State(registry): State<Arc<WidgetRegistry>>,
) -> Response {
    match registry.get(&usage_id) {
        Some(handle) => {
            info!(%usage_id, "New event stream connection");
            ws.on_upgrade(move |socket| handle_events_socket(socket, handle))
        }
        None => ApiError::from(crate::WidgetError::unknown_widget(usage_id)).into_response(),
    }
}

/// Upgrade handler for `/ws/widgets/{id}/editor`.
pub async fn editor_ws_handler(
    ws: WebSocketUpgrade,
    Path(usage_id): Path<String>,
    State(registry): State<Arc<WidgetRegistry>>,
) -> Response {
    match registry.get(&usage_id) {
        Some(handle) => {
            info!(%usage_id, "Editor surface connecting");
            ws.on_upgrade(move |socket| handle_editor_socket(socket, handle))
        }
        None => ApiError::from(crate::WidgetError::unknown_widget(usage_id)).into_response(),
    }
}

/// Forwards the widget's events to one client, with heartbeat pings.
async fn handle_events_socket(socket: WebSocket, handle: WidgetHandle) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before announcing so no event between the two is lost.
    let mut event_receiver = handle.events().subscribe();

    let connected = WidgetEvent::connected(handle.usage_id());
    let Ok(connected_json) = serde_json::to_string(&connected) else {
        warn!("Failed to serialize connected event");
        return;
    };
    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => debug!("Ignoring message on event stream"),
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!(usage_id = %handle.usage_id(), "Event stream client disconnected");
}

/// Relays the editor protocol between one editor surface and the bridge.
async fn handle_editor_socket(socket: WebSocket, handle: WidgetHandle) {
    let (mut sender, mut receiver) = socket.split();
    let bridge = handle.bridge().clone();
    let mut commands = bridge.connect();
    let mut replaced = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(frame))) => {
                        if let Err(e) = bridge.deliver_raw(&frame) {
                            warn!(error = %e, "Dropping malformed editor frame");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Editor socket error: {}", e);
                        break;
                    }
                }
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    // Another surface connected and took over the bridge.
                    replaced = true;
                    break;
                };
                let json = match serde_json::to_string(&command) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize editor command: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }

    if !replaced {
        bridge.disconnect();
    }
    info!(usage_id = %handle.usage_id(), replaced, "Editor surface disconnected");
}

// ============================================================================
// Tests
// ============================================================================
