//! HTTP and WebSocket surface of the widget server.
//!
//! One server hosts any number of widgets. Requests are routed to a widget
//! through the [`WidgetRegistry`], keyed by the widget's usage id.
//!
//! # Endpoints
//!
//! - `GET /api/widgets` - List hosted widget ids
//! - `GET /api/widgets/{id}/project` - Widget and project state
//! - `POST /api/widgets/{id}/submit` - Start a submission
//! - `POST /api/widgets/{id}/files` - Create a file
//! - `DELETE /api/widgets/{id}/files/{name}` - Delete a file (nested names percent-encoded)
//! - `POST /api/widgets/{id}/rename` - Rename a file
//! - `POST /api/widgets/{id}/switch` - Make a file current
//! - `POST /api/widgets/{id}/save` - Persist buffered editor content
//! - `POST /api/widgets/{id}/tests` - Run the test cases
//! - `POST /api/widgets/{id}/reset` - Reset the project on the host
//! - `POST /api/widgets/{id}/initialize` - Re-create the project from templates
//! - `GET /ws/widgets/{id}/editor` - Editor protocol channel
//! - `GET /ws/widgets/{id}/events` - UI event stream
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use codelab_widget::{create_router, Config, HostClient, Widget, WidgetRegistry};
//!
//! # async fn example() -> codelab_widget::Result<()> {
//! let config = Config::default();
//! let host = HostClient::new(&config.handler_base_url, config.request_timeout())?;
//! let handle = Widget::new(config, Arc::new(host))?.spawn();
//!
//! let mut registry = WidgetRegistry::new();
//! registry.insert(handle);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, create_router(registry)).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::error::{ErrorCategory, WidgetError};
use crate::websocket::{editor_ws_handler, events_ws_handler};
use crate::widget::{WidgetHandle, WidgetSnapshot};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRequest {
    /// New filename.
    pub filename: String,
    /// Initial content.
    #[serde(default)]
    pub content: String,
}

/// Request body for renaming a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameFileRequest {
    /// Current name.
    pub old_filename: String,
    /// New name.
    pub new_filename: String,
}

/// Request body for switching files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchFileRequest {
    /// File to show.
    pub filename: String,
}

/// Response body of a successful command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Always `true`.
    pub success: bool,
}

impl CommandResponse {
    const fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// Response body of the widget listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetListResponse {
    /// Hosted widget ids, sorted.
    pub usage_ids: Vec<String>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Registry
// ============================================================================

/// Dispatch table of hosted widgets, keyed by usage id.
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    widgets: BTreeMap<String, WidgetHandle>,
}

impl WidgetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            widgets: BTreeMap::new(),
        }
    }

    /// Adds a widget, replacing any widget with the same usage id.
    pub fn insert(&mut self, handle: WidgetHandle) -> Option<WidgetHandle> {
        info!(usage_id = %handle.usage_id(), "Registering widget");
        self.widgets.insert(handle.usage_id().to_string(), handle)
    }

    /// Looks up a widget.
    #[must_use]
    pub fn get(&self, usage_id: &str) -> Option<WidgetHandle> {
        self.widgets.get(usage_id).cloned()
    }

    /// Hosted usage ids, sorted.
    #[must_use]
    pub fn usage_ids(&self) -> Vec<String> {
        self.widgets.keys().cloned().collect()
    }

    /// Number of hosted widgets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    /// Returns `true` if no widget is hosted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    fn resolve(&self, usage_id: &str) -> Result<WidgetHandle, ApiError> {
        self.get(usage_id)
            .ok_or_else(|| WidgetError::unknown_widget(usage_id).into())
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// A widget error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(WidgetError);

impl From<WidgetError> for ApiError {
    fn from(error: WidgetError) -> Self {
        Self(error)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            WidgetError::UnknownWidget { .. } | WidgetError::FileNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            WidgetError::DuplicateFile { .. } | WidgetError::SubmissionInProgress => {
                StatusCode::CONFLICT
            }
            WidgetError::ProtectedFile { .. } => StatusCode::FORBIDDEN,
            WidgetError::WidgetUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            other => match other.category() {
                ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                ErrorCategory::Transport | ErrorCategory::Server => StatusCode::BAD_GATEWAY,
                ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorCategory::Config | ErrorCategory::Internal => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.0.alert_text(),
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API and WebSocket endpoints.
///
/// Configured with CORS for development and request tracing.
pub fn create_router(registry: WidgetRegistry) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/widgets", get(handle_list))
        .route("/widgets/:id/project", get(handle_project))
        .route("/widgets/:id/submit", post(handle_submit))
        .route("/widgets/:id/files", post(handle_create_file))
        .route("/widgets/:id/files/:name", delete(handle_delete_file))
        .route("/widgets/:id/rename", post(handle_rename_file))
        .route("/widgets/:id/switch", post(handle_switch_file))
        .route("/widgets/:id/save", post(handle_save))
        .route("/widgets/:id/tests", post(handle_run_tests))
        .route("/widgets/:id/reset", post(handle_reset))
        .route("/widgets/:id/initialize", post(handle_initialize));

    let ws_routes = Router::new()
        .route("/widgets/:id/editor", get(editor_ws_handler))
        .route("/widgets/:id/events", get(events_ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(registry))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_list(State(registry): State<Arc<WidgetRegistry>>) -> Json<WidgetListResponse> {
    Json(WidgetListResponse {
        usage_ids: registry.usage_ids(),
    })
}

async fn handle_project(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WidgetSnapshot>> {
    let widget = registry.resolve(&id)?;
    Ok(Json(widget.snapshot().await?))
}

/// Handler for `POST /api/widgets/{id}/submit`.
///
/// Answers 202 once the submission is started; output and feedback arrive on
/// the event stream.
async fn handle_submit(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<CommandResponse>)> {
    let widget = registry.resolve(&id)?;
    widget.submit().await?;
    Ok((StatusCode::ACCEPTED, CommandResponse::ok()))
}

async fn handle_create_file(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
    Json(request): Json<CreateFileRequest>,
) -> ApiResult<(StatusCode, Json<CommandResponse>)> {
    let widget = registry.resolve(&id)?;
    widget
        .create_file(&request.filename, &request.content)
        .await?;
    Ok((StatusCode::CREATED, CommandResponse::ok()))
}

async fn handle_delete_file(
    State(registry): State<Arc<WidgetRegistry>>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Json<CommandResponse>> {
    let widget = registry.resolve(&id)?;
    widget.delete_file(&name).await?;
    Ok(CommandResponse::ok())
}

async fn handle_rename_file(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
    Json(request): Json<RenameFileRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let widget = registry.resolve(&id)?;
    widget
        .rename_file(&request.old_filename, &request.new_filename)
        .await?;
    Ok(CommandResponse::ok())
}

async fn handle_switch_file(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
    Json(request): Json<SwitchFileRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let widget = registry.resolve(&id)?;
    widget.switch_file(&request.filename).await?;
    Ok(CommandResponse::ok())
}

async fn handle_save(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CommandResponse>> {
    let widget = registry.resolve(&id)?;
    widget.save().await?;
    Ok(CommandResponse::ok())
}

async fn handle_run_tests(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<CommandResponse>)> {
    let widget = registry.resolve(&id)?;
    widget.run_tests().await?;
    Ok((StatusCode::ACCEPTED, CommandResponse::ok()))
}

async fn handle_reset(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CommandResponse>> {
    let widget = registry.resolve(&id)?;
    widget.reset().await?;
    Ok(CommandResponse::ok())
}

async fn handle_initialize(
    State(registry): State<Arc<WidgetRegistry>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CommandResponse>> {
    let widget = registry.resolve(&id)?;
    widget.initialize().await?;
    Ok(CommandResponse::ok())
}

// ============================================================================
// Tests
// ============================================================================
