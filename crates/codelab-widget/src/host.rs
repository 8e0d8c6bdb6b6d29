//! Host handler contracts and the HTTP client that calls them.
//!
//! The host exposes JSON handlers at `{handler_base_url}/{name}`. Each group
//! of handlers is an `async_trait` trait so the pipeline and the widget can
//! be driven by test doubles:
//!
//! - [`SandboxApi`] submits code and polls the execution sandbox
//! - [`FeedbackApi`] asks the language-model service for feedback
//! - [`ProjectApi`] persists project files and runs host-side test cases
//!
//! [`HostClient`] implements all three over `reqwest`.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use codelab_report::{TestResult, TestSummary};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WidgetError};
use crate::language::FileType;
use crate::project::{FileRecord, ProjectStructure};

/// Handler names exposed by the host.
pub mod handlers {
    /// Submit a single file's code.
    pub const SUBMIT_CODE: &str = "submit_code_handler";
    /// Submit a whole project.
    pub const SUBMIT_PROJECT: &str = "submit_project";
    /// Poll a submission.
    pub const SUBMISSION_RESULT: &str = "get_submission_result_handler";
    /// Request AI feedback.
    pub const FEEDBACK: &str = "get_response";
    /// Create a file.
    pub const CREATE_FILE: &str = "create_file";
    /// Delete a file.
    pub const DELETE_FILE: &str = "delete_file";
    /// Rename a file.
    pub const RENAME_FILE: &str = "rename_file";
    /// Save a file's content.
    pub const SAVE_FILE: &str = "save_file";
    /// Fetch every file and the project summary.
    pub const PROJECT_STRUCTURE: &str = "get_project_structure";
    /// Replace the project with the configured templates.
    pub const INITIALIZE_PROJECT: &str = "initialize_project";
    /// Reset the learner's state.
    pub const RESET: &str = "reset_handler";
    /// Run the configured test cases on the host.
    pub const RUN_TEST_CASES: &str = "run_test_cases";
}

// ============================================================================
// Sandbox wire types
// ============================================================================

/// Body of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubmitRequest {
    /// Single-file code.
    Code {
        /// Program source.
        user_code: String,
        /// Standard input for the run.
        #[serde(skip_serializing_if = "Option::is_none")]
        stdin: Option<String>,
    },
    /// Every file of a project.
    Project {
        /// Content by filename.
        files: BTreeMap<String, String>,
    },
}

impl SubmitRequest {
    /// Submission of a single file's code.
    #[must_use]
    pub fn code(user_code: impl Into<String>) -> Self {
        Self::Code {
            user_code: user_code.into(),
            stdin: None,
        }
    }

    /// Submission of a single file's code with standard input.
    #[must_use]
    pub fn code_with_stdin(user_code: impl Into<String>, stdin: Option<String>) -> Self {
        Self::Code {
            user_code: user_code.into(),
            stdin,
        }
    }

    /// Submission of a whole project.
    #[must_use]
    pub const fn project(files: BTreeMap<String, String>) -> Self {
        Self::Project { files }
    }

    /// Handler this request is sent to.
    #[must_use]
    pub const fn handler(&self) -> &'static str {
        match self {
            Self::Code { .. } => handlers::SUBMIT_CODE,
            Self::Project { .. } => handlers::SUBMIT_PROJECT,
        }
    }
}

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Opaque sandbox token.
    pub submission_id: String,
}

#[derive(Debug, Serialize)]
struct PollRequest<'a> {
    submission_id: &'a str,
}

/// Raw status object of a poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Numeric status: 1 queued, 2 processing, anything else terminal.
    pub id: i64,
    /// Human-readable status, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Status of a submission as seen by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SandboxStatus {
    /// Waiting for a worker.
    Queued,
    /// Running.
    Processing,
    /// Finished; carries the sandbox's status id.
    Terminal {
        /// Terminal status id (3 is a normal exit).
        id: i64,
    },
}

impl SandboxStatus {
    /// Classifies a raw status id.
    #[must_use]
    pub const fn from_id(id: i64) -> Self {
        match id {
            1 => Self::Queued,
            2 => Self::Processing,
            other => Self::Terminal { id: other },
        }
    }

    /// Returns `true` while the submission has not finished.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }
}

/// Answer to a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Submission status.
    pub status: StatusInfo,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: Option<String>,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: Option<String>,
    /// Compiler output.
    #[serde(default)]
    pub compile_output: Option<String>,
}

impl PollResponse {
    /// Classified status of this response.
    #[must_use]
    pub const fn sandbox_status(&self) -> SandboxStatus {
        SandboxStatus::from_id(self.status.id)
    }
}

// ============================================================================
// Feedback wire types
// ============================================================================

/// Body of a feedback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// Code the learner submitted.
    pub code: String,
    /// Output shown to the learner.
    pub stdout: String,
    /// Error output shown to the learner.
    pub stderr: String,
}

impl FeedbackRequest {
    /// Feedback on code and its execution output.
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Feedback on markup that was never executed.
    #[must_use]
    pub fn markup(code: impl Into<String>) -> Self {
        Self::new(code, "", "")
    }
}

/// Answer to a feedback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    /// Markdown feedback.
    pub response: String,
}

// ============================================================================
// Project wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateFileRequest<'a> {
    filename: &'a str,
    content: &'a str,
    file_type: FileType,
}

#[derive(Debug, Serialize)]
struct FileNameRequest<'a> {
    filename: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameFileRequest<'a> {
    old_filename: &'a str,
    new_filename: &'a str,
}

#[derive(Debug, Serialize)]
struct SaveFileRequest<'a> {
    filename: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct EmptyRequest {}

const fn default_true() -> bool {
    true
}

/// Generic acknowledgement of a mutating handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAck {
    /// Whether the operation succeeded. Absent means success.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Message accompanying a failure, or a status note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Every stored file plus the host's view of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshotResponse {
    /// Stored files by name.
    #[serde(default)]
    pub project_files: BTreeMap<String, FileRecord>,
    /// Summary computed by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_structure: Option<ProjectStructure>,
    /// Exercise language label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Whether the host has multi-file mode enabled.
    #[serde(default)]
    pub enable_multi_file: bool,
}

/// Answer to `initialize_project`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResponse {
    /// Whether the project was initialized.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Number of template files written.
    #[serde(default)]
    pub files_created: usize,
}

/// Answer to `run_test_cases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResponse {
    /// Whether the run happened.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Status note, e.g. when no cases are defined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Per-case results.
    #[serde(default)]
    pub results: Vec<TestResult>,
    /// Tally computed by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<TestSummary>,
}

// ============================================================================
// Traits
// ============================================================================

/// The execution sandbox, reached through the host.
#[async_trait]
pub trait SandboxApi: Send + Sync {
    /// Submits code or a project for execution.
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse>;

    /// Fetches the current state of a submission.
    async fn poll(&self, submission_id: &str) -> Result<PollResponse>;
}

/// The language-model feedback service, reached through the host.
#[async_trait]
pub trait FeedbackApi: Send + Sync {
    /// Requests feedback on submitted code and its output.
    async fn feedback(&self, request: &FeedbackRequest) -> Result<FeedbackResponse>;
}

/// Host-side persistence of the project.
#[async_trait]
pub trait ProjectApi: Send + Sync {
    /// Creates a file.
    async fn create_file(&self, filename: &str, content: &str, file_type: FileType) -> Result<()>;

    /// Deletes a file.
    async fn delete_file(&self, filename: &str) -> Result<()>;

    /// Renames a file.
    async fn rename_file(&self, old_filename: &str, new_filename: &str) -> Result<()>;

    /// Saves a file's content.
    async fn save_file(&self, filename: &str, content: &str) -> Result<()>;

    /// Fetches every stored file.
    async fn project_structure(&self) -> Result<ProjectSnapshotResponse>;

    /// Replaces the stored project with the configured templates.
    async fn initialize_project(&self) -> Result<InitializeResponse>;

    /// Clears the learner's stored state.
    async fn reset(&self) -> Result<()>;

    /// Runs the host-configured test cases.
    async fn run_test_cases(&self) -> Result<TestRunResponse>;
}

/// Everything a widget needs from its host.
pub trait HostApi: SandboxApi + FeedbackApi + ProjectApi {}

impl<T: SandboxApi + FeedbackApi + ProjectApi> HostApi for T {}

// ============================================================================
// HostClient
// ============================================================================

/// `reqwest` implementation of the host handler contracts.
#[derive(Clone)]
pub struct HostClient {
    base_url: String,
    client: reqwest::Client,
}

impl fmt::Debug for HostClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HostClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HostClient {
    /// Creates a client for handlers under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("codelab-widget/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| {
                WidgetError::transport("<client>", format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// URL of a named handler.
    #[must_use]
    pub fn handler_url(&self, handler: &str) -> String {
        format!("{}/{handler}", self.base_url)
    }

    async fn call<B, T>(&self, handler: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.handler_url(handler);
        debug!(handler, %url, "Calling host handler");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| WidgetError::transport(handler, err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| WidgetError::transport(handler, err.to_string()))?;

        if !status.is_success() {
            // Only a body that explains itself is a server-side refusal.
            return Err(match error_message(&text) {
                Some(message) => WidgetError::server(handler, message),
                None => WidgetError::transport(
                    handler,
                    format!("HTTP {status}: {}", truncate_for_error(&text)),
                ),
            });
        }

        serde_json::from_str(&text)
            .map_err(|err| WidgetError::malformed(handler, format!("{err}: {}", truncate_for_error(&text))))
    }

    async fn call_ack<B>(&self, handler: &str, body: &B) -> Result<()>
    where
        B: Serialize + Sync + ?Sized,
    {
        let ack: HostAck = self.call(handler, body).await?;
        if ack.success {
            Ok(())
        } else {
            Err(WidgetError::server(
                handler,
                ack.message
                    .unwrap_or_else(|| format!("{handler} failed")),
            ))
        }
    }
}

/// Extracts `message` (or `error`) from a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(serde_json::Value::as_str))
        .map(ToString::to_string)
}

fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}

#[async_trait]
impl SandboxApi for HostClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        let handler = request.handler();
        let response: SubmitResponse = self.call(handler, request).await?;
        if response.submission_id.trim().is_empty() {
            return Err(WidgetError::server(handler, "No submission ID received"));
        }
        Ok(response)
    }

    async fn poll(&self, submission_id: &str) -> Result<PollResponse> {
        self.call(handlers::SUBMISSION_RESULT, &PollRequest { submission_id })
            .await
    }
}

#[async_trait]
impl FeedbackApi for HostClient {
    async fn feedback(&self, request: &FeedbackRequest) -> Result<FeedbackResponse> {
        self.call(handlers::FEEDBACK, request).await
    }
}

#[async_trait]
impl ProjectApi for HostClient {
    async fn create_file(&self, filename: &str, content: &str, file_type: FileType) -> Result<()> {
        self.call_ack(
            handlers::CREATE_FILE,
            &CreateFileRequest {
                filename,
                content,
                file_type,
            },
        )
        .await
    }

    async fn delete_file(&self, filename: &str) -> Result<()> {
        self.call_ack(handlers::DELETE_FILE, &FileNameRequest { filename })
            .await
    }

    async fn rename_file(&self, old_filename: &str, new_filename: &str) -> Result<()> {
        self.call_ack(
            handlers::RENAME_FILE,
            &RenameFileRequest {
                old_filename,
                new_filename,
            },
        )
        .await
    }

    async fn save_file(&self, filename: &str, content: &str) -> Result<()> {
        self.call_ack(handlers::SAVE_FILE, &SaveFileRequest { filename, content })
            .await
    }

    async fn project_structure(&self) -> Result<ProjectSnapshotResponse> {
        self.call(handlers::PROJECT_STRUCTURE, &EmptyRequest {}).await
    }

    async fn initialize_project(&self) -> Result<InitializeResponse> {
        let response: InitializeResponse =
            self.call(handlers::INITIALIZE_PROJECT, &EmptyRequest {}).await?;
        if response.success {
            Ok(response)
        } else {
            Err(WidgetError::server(
                handlers::INITIALIZE_PROJECT,
                "Failed to initialize project",
            ))
        }
    }

    async fn reset(&self) -> Result<()> {
        self.call_ack(handlers::RESET, &EmptyRequest {}).await
    }

    async fn run_test_cases(&self) -> Result<TestRunResponse> {
        let response: TestRunResponse =
            self.call(handlers::RUN_TEST_CASES, &EmptyRequest {}).await?;
        if response.success {
            Ok(response)
        } else {
            Err(WidgetError::server(
                handlers::RUN_TEST_CASES,
                response
                    .message
                    .unwrap_or_else(|| "Failed to run test cases".to_string()),
            ))
        }
    }
}
