//! Error types for the code-lab widget.
//!
//! This module defines the error hierarchy for all widget operations,
//! including configuration loading, project file bookkeeping, host handler
//! calls, and the submission pipeline.

use std::path::PathBuf;

/// A specialized `Result` type for widget operations.
pub type Result<T> = std::result::Result<T, WidgetError>;

/// Errors that can occur while driving a code-lab widget.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible. Host-reported failures carry the server message verbatim so
/// it can be shown to the learner unchanged.
#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your codelab.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Project Errors
    // ========================================================================
    /// Filename is empty, too long, or contains characters outside `[A-Za-z0-9._/-]`.
    #[error("Invalid filename: '{name}'\n\nSuggestion: Use only letters, digits, '.', '_', '-' and '/' (at most 255 characters)")]
    InvalidFileName {
        /// The rejected filename.
        name: String,
    },

    /// A file with the same name already exists in the project.
    #[error("File already exists: '{name}'")]
    DuplicateFile {
        /// The conflicting filename.
        name: String,
    },

    /// The named file is not part of the project.
    #[error("File not found: '{name}'")]
    FileNotFound {
        /// The missing filename.
        name: String,
    },

    /// The named file is an entry point or manifest and cannot be deleted
    /// or renamed.
    #[error("Cannot {operation} protected file: '{name}'")]
    ProtectedFile {
        /// The protected filename.
        name: String,
        /// What was attempted ("delete" or "rename").
        operation: &'static str,
    },

    /// There is nothing to submit.
    #[error("No code to submit\n\nSuggestion: Write some code in the editor first")]
    EmptySubmission,

    // ========================================================================
    // Host Errors
    // ========================================================================
    /// The handler could not be reached (connection refused, timeout, TLS)
    /// or answered with a bare HTTP error status.
    #[error("Network error calling '{endpoint}': {message}")]
    Transport {
        /// Handler name that was called.
        endpoint: String,
        /// Description of the transport failure.
        message: String,
    },

    /// The handler refused the request with a `message` or `success: false`.
    #[error("{message}")]
    Server {
        /// Handler name that was called.
        endpoint: String,
        /// Server-provided message, shown verbatim.
        message: String,
    },

    /// The handler answered with a body that could not be decoded.
    #[error("Malformed response from '{endpoint}': {message}")]
    MalformedResponse {
        /// Handler name that was called.
        endpoint: String,
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // Pipeline Errors
    // ========================================================================
    /// The sandbox did not reach a terminal status within the polling budget.
    #[error("Execution timed out after {attempts} polls of submission '{submission_id}'\n\nSuggestion: Check for infinite loops or blocking input reads")]
    PollTimeout {
        /// Sandbox submission identifier.
        submission_id: String,
        /// Number of polls performed.
        attempts: u32,
    },

    /// A submission or test run is already in flight for this widget.
    #[error("A submission is already in progress")]
    SubmissionInProgress,

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// No widget is registered under the given usage id.
    #[error("Unknown widget: '{usage_id}'")]
    UnknownWidget {
        /// The requested usage id.
        usage_id: String,
    },

    /// The widget task has stopped and no longer accepts commands.
    #[error("Widget '{usage_id}' is no longer running")]
    WidgetUnavailable {
        /// The usage id of the stopped widget.
        usage_id: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of [`WidgetError`] used for logging and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The host could not be reached.
    Transport,
    /// The sandbox never finished.
    Timeout,
    /// Local input was rejected before any host call.
    Validation,
    /// The host reported a failure.
    Server,
    /// Configuration could not be loaded.
    Config,
    /// Everything else.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
            Self::Validation => write!(f, "validation"),
            Self::Server => write!(f, "server"),
            Self::Config => write!(f, "config"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl WidgetError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidFileName` error.
    #[must_use]
    pub fn invalid_file_name(name: impl Into<String>) -> Self {
        Self::InvalidFileName { name: name.into() }
    }

    /// Creates a new `DuplicateFile` error.
    #[must_use]
    pub fn duplicate_file(name: impl Into<String>) -> Self {
        Self::DuplicateFile { name: name.into() }
    }

    /// Creates a new `FileNotFound` error.
    #[must_use]
    pub fn file_not_found(name: impl Into<String>) -> Self {
        Self::FileNotFound { name: name.into() }
    }

    /// Creates a new `ProtectedFile` error.
    #[must_use]
    pub fn protected_file(name: impl Into<String>, operation: &'static str) -> Self {
        Self::ProtectedFile {
            name: name.into(),
            operation,
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Server` error.
    #[must_use]
    pub fn server(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a new `MalformedResponse` error.
    #[must_use]
    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a new `PollTimeout` error.
    #[must_use]
    pub fn poll_timeout(submission_id: impl Into<String>, attempts: u32) -> Self {
        Self::PollTimeout {
            submission_id: submission_id.into(),
            attempts,
        }
    }

    /// Creates a new `UnknownWidget` error.
    #[must_use]
    pub fn unknown_widget(usage_id: impl Into<String>) -> Self {
        Self::UnknownWidget {
            usage_id: usage_id.into(),
        }
    }

    /// Creates a new `WidgetUnavailable` error.
    #[must_use]
    pub fn widget_unavailable(usage_id: impl Into<String>) -> Self {
        Self::WidgetUnavailable {
            usage_id: usage_id.into(),
        }
    }

    /// Returns the category this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::PollTimeout { .. } => ErrorCategory::Timeout,
            Self::InvalidFileName { .. }
            | Self::DuplicateFile { .. }
            | Self::FileNotFound { .. }
            | Self::ProtectedFile { .. }
            | Self::EmptySubmission
            | Self::SubmissionInProgress => ErrorCategory::Validation,
            Self::Server { .. } | Self::MalformedResponse { .. } => ErrorCategory::Server,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => {
                ErrorCategory::Config
            }
            Self::UnknownWidget { .. }
            | Self::WidgetUnavailable { .. }
            | Self::Io(_)
            | Self::Json(_) => ErrorCategory::Internal,
        }
    }

    /// Returns the text shown to the learner in an alert.
    ///
    /// Drops the suggestion trailer so alerts stay on one line.
    #[must_use]
    pub fn alert_text(&self) -> String {
        let full = self.to_string();
        match full.split_once("\n\n") {
            Some((head, _)) => head.to_string(),
            None => full,
        }
    }

    /// Returns `true` if this error is fatal for the process (bad configuration).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = WidgetError::invalid_file_name("bad name!.py");
        let msg = err.to_string();
        assert!(msg.contains("Invalid filename"));
        assert!(msg.contains("bad name!.py"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_server_message_is_verbatim() {
        let err = WidgetError::server("delete_file", "Cannot delete main.py");
        assert_eq!(err.to_string(), "Cannot delete main.py");
        assert_eq!(err.alert_text(), "Cannot delete main.py");
    }

    #[test]
    fn test_alert_text_drops_suggestion() {
        let err = WidgetError::poll_timeout("tok-1", 5);
        assert_eq!(
            err.alert_text(),
            "Execution timed out after 5 polls of submission 'tok-1'"
        );
    }

    #[test]
    fn test_category() {
        assert_eq!(
            WidgetError::transport("submit_code_handler", "connection refused").category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            WidgetError::poll_timeout("tok", 5).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            WidgetError::duplicate_file("a.py").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            WidgetError::malformed("get_response", "expected value").category(),
            ErrorCategory::Server
        );
        assert_eq!(ErrorCategory::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_transport_and_timeout_are_distinct() {
        let transport = WidgetError::transport("get_submission_result_handler", "reset");
        let timeout = WidgetError::poll_timeout("tok", 5);
        assert_ne!(transport.category(), timeout.category());
    }

    #[test]
    fn test_is_fatal() {
        assert!(WidgetError::config_validation("bad", "fix it").is_fatal());
        assert!(!WidgetError::EmptySubmission.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WidgetError = io_err.into();
        assert!(matches!(err, WidgetError::Io(_)));
    }
}
