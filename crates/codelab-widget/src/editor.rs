//! Message-passing bridge to the embedded editor surface.
//!
//! The editor lives on the other side of a channel (a WebSocket in the
//! server) and speaks a small JSON protocol discriminated by a `type` field.
//! [`EditorBridge`] sends model commands, resolves content requests, and
//! re-dispatches the editor's own events to the widget as [`EditorEvent`]s.
//!
//! Until the editor announces `editorReady`, every outbound operation is a
//! silent no-op. There is no timeout at this layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::Result;

// ============================================================================
// Wire protocol
// ============================================================================

/// A message of the editor protocol, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditorMessage {
    /// Editor finished loading and accepts commands.
    EditorReady,
    /// The learner edited a file.
    ContentChanged {
        /// File that changed.
        file: String,
        /// Full new content.
        content: String,
    },
    /// The learner switched tabs inside the editor.
    FileSwitched {
        /// Newly displayed file.
        filename: String,
    },
    /// Answer to [`EditorMessage::GetContent`].
    ContentResponse {
        /// File the content belongs to.
        filename: String,
        /// Current editor content.
        content: String,
    },
    /// Create an editor model for a file.
    CreateModel {
        /// File to create.
        filename: String,
        /// Initial content.
        content: String,
        /// Editor syntax mode.
        language: String,
    },
    /// Display the named model.
    SwitchToModel {
        /// File to display.
        filename: String,
    },
    /// Dispose of the named model.
    DeleteModel {
        /// File to dispose.
        filename: String,
    },
    /// Move a model to a new name.
    RenameModel {
        /// Current name.
        old_filename: String,
        /// New name.
        new_filename: String,
    },
    /// Replace the content of a model.
    SetContent {
        /// File to overwrite.
        filename: String,
        /// New content.
        content: String,
    },
    /// Ask the editor for a model's content.
    GetContent {
        /// File whose content is wanted.
        filename: String,
    },
}

/// Events the editor raises for the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// The editor became ready; models should be (re)created.
    Ready,
    /// The learner edited a file.
    ContentChanged {
        /// File that changed.
        filename: String,
        /// Full new content.
        content: String,
    },
    /// The editor switched to another file.
    FileSwitched {
        /// Newly displayed file.
        filename: String,
    },
}

// ============================================================================
// Bridge
// ============================================================================

#[derive(Debug, Default)]
struct BridgeState {
    outbound: Option<mpsc::UnboundedSender<EditorMessage>>,
    ready: bool,
    pending: HashMap<String, Vec<oneshot::Sender<String>>>,
}

/// Cloneable handle to one widget's editor surface.
#[derive(Debug, Clone)]
pub struct EditorBridge {
    state: Arc<Mutex<BridgeState>>,
    events: mpsc::UnboundedSender<EditorEvent>,
}

impl EditorBridge {
    /// Creates a bridge and the receiver on which editor events arrive.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EditorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            state: Arc::new(Mutex::new(BridgeState::default())),
            events,
        };
        (bridge, rx)
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches an editor surface and returns the stream of commands for it.
    ///
    /// Replaces any previous surface. The bridge stays not-ready until the
    /// surface sends `editorReady`.
    #[must_use]
    pub fn connect(&self) -> mpsc::UnboundedReceiver<EditorMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.outbound = Some(tx);
        state.ready = false;
        state.pending.clear();
        rx
    }

    /// Detaches the editor surface. Pending content requests resolve to `None`.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.outbound = None;
        state.ready = false;
        state.pending.clear();
    }

    /// Returns `true` once the editor has announced itself ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    fn send(&self, message: EditorMessage) -> bool {
        let state = self.lock();
        if !state.ready {
            debug!(?message, "Editor not ready, dropping command");
            return false;
        }
        state
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok())
    }

    /// Creates a model for a file. Fire-and-forget.
    pub fn create_model(&self, filename: &str, content: &str, language: &str) {
        self.send(EditorMessage::CreateModel {
            filename: filename.to_string(),
            content: content.to_string(),
            language: language.to_string(),
        });
    }

    /// Asks the editor to display a file.
    pub fn switch_to(&self, filename: &str) {
        self.send(EditorMessage::SwitchToModel {
            filename: filename.to_string(),
        });
    }

    /// Disposes of a model. Outstanding content requests for it are dropped.
    pub fn delete_model(&self, filename: &str) {
        self.lock().pending.remove(filename);
        self.send(EditorMessage::DeleteModel {
            filename: filename.to_string(),
        });
    }

    /// Moves a model to a new name.
    pub fn rename_model(&self, old_filename: &str, new_filename: &str) {
        self.lock().pending.remove(old_filename);
        self.send(EditorMessage::RenameModel {
            old_filename: old_filename.to_string(),
            new_filename: new_filename.to_string(),
        });
    }

    /// Overwrites a model's content.
    pub fn set_content(&self, filename: &str, content: &str) {
        self.send(EditorMessage::SetContent {
            filename: filename.to_string(),
            content: content.to_string(),
        });
    }

    /// Requests a model's current content.
    ///
    /// Interest is registered before the request is sent, so the response
    /// cannot be missed. Returns `None` when the editor is not ready; the
    /// receiver errors if the file is deleted or the editor detaches before
    /// answering.
    #[must_use]
    pub fn request_content(&self, filename: &str) -> Option<oneshot::Receiver<String>> {
        let mut state = self.lock();
        if !state.ready {
            return None;
        }
        let outbound = state.outbound.clone()?;
        let (tx, rx) = oneshot::channel();
        state
            .pending
            .entry(filename.to_string())
            .or_default()
            .push(tx);
        drop(state);

        let sent = outbound
            .send(EditorMessage::GetContent {
                filename: filename.to_string(),
            })
            .is_ok();
        sent.then_some(rx)
    }

    /// Handles one message from the editor surface.
    pub fn deliver(&self, message: EditorMessage) {
        let event = match message {
            EditorMessage::EditorReady => {
                self.lock().ready = true;
                EditorEvent::Ready
            }
            EditorMessage::ContentChanged { file, content } => EditorEvent::ContentChanged {
                filename: file,
                content,
            },
            EditorMessage::FileSwitched { filename } => EditorEvent::FileSwitched { filename },
            EditorMessage::ContentResponse { filename, content } => {
                self.resolve(&filename, content);
                return;
            }
            other => {
                warn!(message = ?other, "Ignoring command-type message from editor");
                return;
            }
        };
        // The widget owns the receiver for its whole lifetime.
        let _ = self.events.send(event);
    }

    /// Parses and handles one JSON frame from the editor surface.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::Json` if the frame is not a protocol message.
    pub fn deliver_raw(&self, frame: &str) -> Result<()> {
        let message: EditorMessage = serde_json::from_str(frame)?;
        self.deliver(message);
        Ok(())
    }

    fn resolve(&self, filename: &str, content: String) {
        let waiter = {
            let mut state = self.lock();
            let waiter = state.pending.get_mut(filename).and_then(|waiters| {
                if waiters.is_empty() {
                    None
                } else {
                    Some(waiters.remove(0))
                }
            });
            if state.pending.get(filename).is_some_and(Vec::is_empty) {
                state.pending.remove(filename);
            }
            waiter
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(content);
            }
            None => debug!(filename, "Discarding unsolicited content response"),
        }
    }
}
