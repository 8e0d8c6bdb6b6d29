//! Code-Lab Widget
//!
//! Controller for an embedded coding exercise: multi-file project state, the
//! editor message bridge, the sandbox submission pipeline, AI feedback, test
//! runs, and the HTTP/WebSocket surface that hosts widget instances.

pub mod api;
pub mod config;
pub mod editor;
pub mod error;
pub mod feedback;
pub mod host;
pub mod language;
pub mod pipeline;
pub mod project;
pub mod websocket;
pub mod widget;

pub use api::{create_router, ApiError, ErrorResponse, WidgetRegistry};
pub use config::{Config, FileTemplate};
pub use editor::{EditorBridge, EditorEvent, EditorMessage};
pub use error::{ErrorCategory, Result, WidgetError};
pub use feedback::FeedbackRequester;
pub use host::{FeedbackApi, HostApi, HostClient, ProjectApi, SandboxApi, SubmitRequest};
pub use language::{FileType, Language};
pub use pipeline::{
    DisplayedOutput, ExecutionOutput, PipelinePhase, PipelineSettings, SubmissionAttempt,
    SubmissionPipeline,
};
pub use project::{FileRecord, ProjectSnapshot, ProjectState, ProjectStructure};
pub use websocket::{EventBroadcaster, Tab, WidgetEvent};
pub use widget::{
    SubmissionJob, SubmissionOutcome, TestJob, Widget, WidgetHandle, WidgetSnapshot,
};
