//! Submission pipeline: submit, poll to a terminal status, shape the output.
//!
//! A [`SubmissionPipeline`] moves through
//! `Submitting -> Polling -> {Succeeded, Failed}`. Polling is a loop over a
//! bounded counter: queued and processing answers count against
//! [`PipelineSettings::max_retries`], and the pipeline gives up with
//! [`WidgetError::PollTimeout`] once the budget is spent. A transport failure
//! at any point fails the attempt at once. Nothing is retried automatically
//! after a terminal state.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, WidgetError};
use crate::host::{PollResponse, SandboxApi, SandboxStatus, SubmitRequest};
use crate::language::Language;

/// Default delay before the first poll.
pub const INITIAL_POLL_DELAY: Duration = Duration::from_millis(2000);

/// Default delay between polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default maximum number of polls.
pub const MAX_POLL_RETRIES: u32 = 5;

// ============================================================================
// Settings and state
// ============================================================================

/// Timing parameters of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Delay between submission and the first poll.
    pub initial_delay: Duration,
    /// Delay between consecutive polls.
    pub poll_interval: Duration,
    /// Maximum number of polls.
    pub max_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_POLL_DELAY,
            poll_interval: POLL_INTERVAL,
            max_retries: MAX_POLL_RETRIES,
        }
    }
}

/// Phase of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Sending code to the sandbox.
    Submitting,
    /// Waiting for the sandbox to finish.
    Polling,
    /// The sandbox returned a terminal status.
    Succeeded,
    /// Transport failure, server error or poll timeout.
    Failed,
}

impl PipelinePhase {
    /// Returns `true` if no further transition can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of a submission attempt as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Waiting for a worker.
    Queued,
    /// Running.
    Processing,
    /// Finished.
    Terminal,
}

/// One submission to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    /// Sandbox token.
    pub submission_id: String,
    /// Polls that came back queued or processing.
    pub retry_count: u32,
    /// Last observed status.
    pub status: AttemptStatus,
}

impl SubmissionAttempt {
    fn new(submission_id: String) -> Self {
        Self {
            submission_id,
            retry_count: 0,
            status: AttemptStatus::Queued,
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Raw output of a finished submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Terminal status id.
    pub status_id: i64,
    /// Captured standard output.
    pub stdout: Option<String>,
    /// Captured standard error.
    pub stderr: Option<String>,
    /// Compiler output.
    pub compile_output: Option<String>,
}

impl ExecutionOutput {
    fn from_poll(response: PollResponse) -> Self {
        Self {
            status_id: response.status.id,
            stdout: response.stdout,
            stderr: response.stderr,
            compile_output: response.compile_output,
        }
    }

    /// Compiler output and stdout joined by a newline, trimmed.
    ///
    /// # Examples
    ///
    /// ```
    /// use codelab_widget::pipeline::ExecutionOutput;
    ///
    /// let output = ExecutionOutput {
    ///     stdout: Some("42\n".to_string()),
    ///     compile_output: Some(String::new()),
    ///     ..ExecutionOutput::default()
    /// };
    /// assert_eq!(output.displayed_stdout(), "42");
    /// ```
    #[must_use]
    pub fn displayed_stdout(&self) -> String {
        let compile = self.compile_output.as_deref().unwrap_or_default();
        let stdout = self.stdout.as_deref().unwrap_or_default();
        format!("{compile}\n{stdout}").trim().to_string()
    }

    /// Standard error, verbatim.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        self.stderr.clone().unwrap_or_default()
    }
}

/// What the learner sees after a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayedOutput {
    /// Text panels.
    Text {
        /// Displayed standard output.
        stdout: String,
        /// Standard error.
        stderr: String,
    },
    /// Rendered preview of markup.
    Preview {
        /// Sanitized HTML.
        html: String,
    },
}

impl DisplayedOutput {
    /// Shapes execution output for the exercise's language.
    #[must_use]
    pub fn from_execution(output: &ExecutionOutput, language: Language) -> Self {
        if language.is_markup() {
            Self::preview(&output.displayed_stdout())
        } else {
            Self::Text {
                stdout: output.displayed_stdout(),
                stderr: output.stderr_text(),
            }
        }
    }

    /// Preview of markup source with `<script>` elements removed.
    #[must_use]
    pub fn preview(html: &str) -> Self {
        Self::Preview {
            html: strip_script_tags(html),
        }
    }

    /// Standard output to hand to the feedback service.
    #[must_use]
    pub fn feedback_stdout(&self) -> &str {
        match self {
            Self::Text { stdout, .. } => stdout,
            Self::Preview { .. } => "",
        }
    }

    /// Standard error to hand to the feedback service.
    #[must_use]
    pub fn feedback_stderr(&self) -> &str {
        match self {
            Self::Text { stderr, .. } => stderr,
            Self::Preview { .. } => "",
        }
    }
}

static SCRIPT_TAG: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").ok());

/// Removes `<script>` elements from markup before it is previewed.
///
/// # Examples
///
/// ```
/// use codelab_widget::pipeline::strip_script_tags;
///
/// let html = "<p>hi</p><SCRIPT src=x>alert(1)</script>";
/// assert_eq!(strip_script_tags(html), "<p>hi</p>");
/// ```
#[must_use]
pub fn strip_script_tags(html: &str) -> String {
    SCRIPT_TAG.as_ref().map_or_else(
        || html.to_string(),
        |pattern| pattern.replace_all(html, "").into_owned(),
    )
}

// ============================================================================
// Pipeline
// ============================================================================

/// A finished, successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSubmission {
    /// The attempt, with its final retry count.
    pub attempt: SubmissionAttempt,
    /// Raw execution output.
    pub output: ExecutionOutput,
}

/// Drives one submission through the sandbox.
pub struct SubmissionPipeline<'a, S: SandboxApi + ?Sized> {
    sandbox: &'a S,
    settings: PipelineSettings,
    phase: PipelinePhase,
    attempt: Option<SubmissionAttempt>,
}

impl<'a, S: SandboxApi + ?Sized> SubmissionPipeline<'a, S> {
    /// Creates a pipeline in the `Submitting` phase.
    #[must_use]
    pub const fn new(sandbox: &'a S, settings: PipelineSettings) -> Self {
        Self {
            sandbox,
            settings,
            phase: PipelinePhase::Submitting,
            attempt: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// The attempt, once the sandbox has accepted the submission.
    #[must_use]
    pub const fn attempt(&self) -> Option<&SubmissionAttempt> {
        self.attempt.as_ref()
    }

    fn transition(&mut self, to: PipelinePhase) {
        debug!(from = %self.phase, %to, "Pipeline transition");
        self.phase = to;
    }

    fn fail(&mut self, error: WidgetError) -> WidgetError {
        warn!(error = %error, category = %error.category(), "Submission failed");
        self.transition(PipelinePhase::Failed);
        error
    }

    /// Submits `request` and polls until the sandbox finishes.
    ///
    /// # Errors
    ///
    /// Returns the transport or server error of the failing call, or
    /// `WidgetError::PollTimeout` once the poll budget is spent.
    pub async fn run(&mut self, request: &SubmitRequest) -> Result<CompletedSubmission> {
        let submitted = match self.sandbox.submit(request).await {
            Ok(submitted) => submitted,
            Err(e) => return Err(self.fail(e)),
        };
        info!(submission_id = %submitted.submission_id, "Submission accepted");

        let mut attempt = SubmissionAttempt::new(submitted.submission_id);
        self.transition(PipelinePhase::Polling);
        tokio::time::sleep(self.settings.initial_delay).await;

        let polled = self.poll_until_terminal(&mut attempt).await;
        self.attempt = Some(attempt.clone());
        let response = match polled {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(PipelinePhase::Succeeded);
        info!(
            submission_id = %attempt.submission_id,
            retries = attempt.retry_count,
            status_id = response.status.id,
            "Submission finished"
        );
        Ok(CompletedSubmission {
            attempt,
            output: ExecutionOutput::from_poll(response),
        })
    }

    /// Polls `attempt` until the sandbox reports a terminal status.
    async fn poll_until_terminal(&self, attempt: &mut SubmissionAttempt) -> Result<PollResponse> {
        loop {
            let response = self.sandbox.poll(&attempt.submission_id).await?;
            match response.sandbox_status() {
                SandboxStatus::Terminal { .. } => {
                    attempt.status = AttemptStatus::Terminal;
                    return Ok(response);
                }
                pending => {
                    attempt.status = if pending == SandboxStatus::Queued {
                        AttemptStatus::Queued
                    } else {
                        AttemptStatus::Processing
                    };
                    attempt.retry_count += 1;
                    debug!(
                        submission_id = %attempt.submission_id,
                        retry = attempt.retry_count,
                        "Submission still pending"
                    );
                    if attempt.retry_count >= self.settings.max_retries {
                        return Err(WidgetError::poll_timeout(
                            attempt.submission_id.clone(),
                            attempt.retry_count,
                        ));
                    }
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
    }
}
