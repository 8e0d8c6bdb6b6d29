//! The widget controller.
//!
//! A [`Widget`] owns one learner's project and runs as a single task: user
//! commands arrive over a channel, editor events over the bridge, and the
//! auto-save timer fires from the same `select!` loop, so project state is
//! never shared. Submissions and test runs are spawned as separate jobs that
//! work on an immutable [`ProjectSnapshot`], which keeps editing responsive
//! while the sandbox is polled. A busy flag allows at most one job at a time.
//!
//! Callers talk to a running widget through a cloneable [`WidgetHandle`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codelab_report::{MarkdownGenerator, TestCase, TestReport, TestResult, TestRun};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::editor::{EditorBridge, EditorEvent};
use crate::error::{Result, WidgetError};
use crate::feedback::FeedbackRequester;
use crate::host::{handlers, FeedbackRequest, HostApi, SubmitRequest};
use crate::language::Language;
use crate::pipeline::{DisplayedOutput, ExecutionOutput, PipelineSettings, SubmissionPipeline};
use crate::project::{is_protected, FileRecord, ProjectSnapshot, ProjectState, ProjectStructure};
use crate::websocket::{EventBroadcaster, Tab, WidgetEvent};

/// Capacity of a widget's command queue.
const COMMAND_BUFFER: usize = 32;

// ============================================================================
// Busy flag
// ============================================================================

/// Holds the widget's busy flag for the lifetime of one job.
///
/// Dropping the guard clears the flag and re-enables submit, whether the
/// job finished, failed or was aborted.
struct BusyGuard {
    flag: Arc<AtomicBool>,
    events: EventBroadcaster,
}

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>, events: &EventBroadcaster) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        events.send(WidgetEvent::submitting(true));
        Some(Self {
            flag: Arc::clone(flag),
            events: events.clone(),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.events.send(WidgetEvent::submitting(false));
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// What a finished submission showed the learner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    /// Output or preview.
    pub displayed: DisplayedOutput,
    /// Rendered feedback, or `None` if the feedback request failed.
    pub feedback: Option<String>,
}

/// One submission: pipeline, output publishing and feedback.
pub struct SubmissionJob<H: HostApi> {
    host: Arc<H>,
    events: EventBroadcaster,
    settings: PipelineSettings,
    language: Language,
    snapshot: ProjectSnapshot,
}

impl<H: HostApi> SubmissionJob<H> {
    /// Creates a job for a snapshot of the project.
    #[must_use]
    pub const fn new(
        host: Arc<H>,
        events: EventBroadcaster,
        settings: PipelineSettings,
        language: Language,
        snapshot: ProjectSnapshot,
    ) -> Self {
        Self {
            host,
            events,
            settings,
            language,
            snapshot,
        }
    }

    fn request(&self) -> SubmitRequest {
        if self.snapshot.is_multi_file() {
            SubmitRequest::project(self.snapshot.files().clone())
        } else {
            SubmitRequest::code(self.snapshot.current_content().unwrap_or_default())
        }
    }

    /// Runs the submission to completion.
    ///
    /// Markup is previewed directly and never sent to the sandbox. A
    /// feedback failure is reported inline and does not fail the job.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::EmptySubmission` for an empty snapshot, or the
    /// pipeline's transport, server or timeout error.
    pub async fn run(self) -> Result<SubmissionOutcome> {
        if self.snapshot.is_empty() {
            return Err(WidgetError::EmptySubmission);
        }

        let displayed = if self.language.is_markup() {
            DisplayedOutput::preview(&self.snapshot.entry_code(self.language))
        } else {
            let request = self.request();
            let mut pipeline = SubmissionPipeline::new(self.host.as_ref(), self.settings);
            match pipeline.run(&request).await {
                Ok(done) => DisplayedOutput::from_execution(&done.output, self.language),
                Err(e) => {
                    self.events.send(WidgetEvent::alert(e.alert_text()));
                    return Err(e);
                }
            }
        };

        match &displayed {
            DisplayedOutput::Text { stdout, stderr } => {
                self.events
                    .send(WidgetEvent::output(stdout.clone(), stderr.clone()));
            }
            DisplayedOutput::Preview { html } => {
                self.events.send(WidgetEvent::preview(html.clone()));
            }
        }
        self.events.send(WidgetEvent::tab_switched(Tab::Output));

        let request = FeedbackRequest::new(
            self.snapshot.feedback_code(self.language),
            displayed.feedback_stdout(),
            displayed.feedback_stderr(),
        );
        let feedback = FeedbackRequester::new(self.host.as_ref(), &self.events)
            .request(&request)
            .await
            .ok();

        Ok(SubmissionOutcome {
            displayed,
            feedback,
        })
    }
}

/// Output of one test-case attempt as the learner would have seen it.
fn test_run(output: &ExecutionOutput, execution_time_seconds: f64) -> TestRun {
    TestRun {
        stdout: output.displayed_stdout(),
        stderr: output.stderr_text().trim().to_string(),
        compile_output: output
            .compile_output
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string(),
        status_id: Some(output.status_id),
        execution_time_seconds,
    }
}

/// One test run, local or on the host.
pub struct TestJob<H: HostApi> {
    host: Arc<H>,
    events: EventBroadcaster,
    settings: PipelineSettings,
    language: Language,
    snapshot: ProjectSnapshot,
    cases: Vec<TestCase>,
}

impl<H: HostApi> TestJob<H> {
    /// Creates a job. With no `cases`, the host's test cases are run.
    #[must_use]
    pub const fn new(
        host: Arc<H>,
        events: EventBroadcaster,
        settings: PipelineSettings,
        language: Language,
        snapshot: ProjectSnapshot,
        cases: Vec<TestCase>,
    ) -> Self {
        Self {
            host,
            events,
            settings,
            language,
            snapshot,
            cases,
        }
    }

    /// Runs every case and publishes the report.
    ///
    /// # Errors
    ///
    /// Returns the host error when the host run fails. Failures of single
    /// local cases become failed results instead.
    pub async fn run(self) -> Result<TestReport> {
        let results = if self.cases.is_empty() {
            match self.run_on_host().await {
                Ok(results) => results,
                Err(e) => {
                    self.events.send(WidgetEvent::alert(e.alert_text()));
                    return Err(e);
                }
            }
        } else {
            self.run_locally().await
        };

        let report = TestReport::new(results);
        info!(
            total = report.summary.total,
            passed = report.summary.passed,
            "Test run finished"
        );
        let markdown = MarkdownGenerator::new(&report).generate();
        self.events
            .send(WidgetEvent::test_results(report.clone(), markdown));
        self.events.send(WidgetEvent::tab_switched(Tab::TestResults));
        Ok(report)
    }

    async fn run_on_host(&self) -> Result<Vec<TestResult>> {
        let response = self.host.run_test_cases().await?;
        if !response.success {
            return Err(WidgetError::server(
                handlers::RUN_TEST_CASES,
                response
                    .message
                    .unwrap_or_else(|| "Test run failed".to_string()),
            ));
        }
        Ok(response.results)
    }

    async fn run_locally(&self) -> Vec<TestResult> {
        let code = self.snapshot.entry_code(self.language);
        let mut results = Vec::with_capacity(self.cases.len());

        for (number, case) in (1u32..).zip(&self.cases) {
            let started = Instant::now();
            let request = SubmitRequest::code_with_stdin(code.clone(), case.input.clone());
            let mut pipeline = SubmissionPipeline::new(self.host.as_ref(), self.settings);

            let outcome = match case.timeout {
                Some(secs) => {
                    let limited =
                        tokio::time::timeout(Duration::from_secs(secs), pipeline.run(&request))
                            .await;
                    limited.unwrap_or_else(|_| {
                        let attempt = pipeline.attempt();
                        Err(WidgetError::poll_timeout(
                            attempt.map(|a| a.submission_id.clone()).unwrap_or_default(),
                            attempt.map_or(0, |a| a.retry_count),
                        ))
                    })
                }
                None => pipeline.run(&request).await,
            };
            let seconds = started.elapsed().as_secs_f64();

            let result = match outcome {
                Ok(done) => case.evaluate(number, &test_run(&done.output, seconds)),
                Err(e) => case.errored(number, e.alert_text(), seconds),
            };
            debug!(test = number, passed = result.passed, "Test case finished");
            results.push(result);
        }

        results
    }
}

// ============================================================================
// Commands and handle
// ============================================================================

type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests a running widget accepts.
#[derive(Debug)]
pub enum WidgetCommand {
    /// Report the widget's state.
    Snapshot {
        /// Reply channel.
        reply: oneshot::Sender<WidgetSnapshot>,
    },
    /// Reload the project from the host.
    Load {
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Add a file and make it current.
    CreateFile {
        /// New filename.
        filename: String,
        /// Initial content.
        content: String,
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Remove a file.
    DeleteFile {
        /// File to remove.
        filename: String,
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Rename a file.
    RenameFile {
        /// Current name.
        old_filename: String,
        /// New name.
        new_filename: String,
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Make a file current.
    SwitchFile {
        /// File to show.
        filename: String,
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Persist buffered editor content now.
    Save {
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Start a submission.
    Submit {
        /// Reply channel; answered once the job is started.
        reply: Reply<()>,
    },
    /// Start a test run.
    RunTests {
        /// Reply channel; answered once the job is started.
        reply: Reply<()>,
    },
    /// Clear the learner's state on the host and reload.
    Reset {
        /// Reply channel.
        reply: Reply<()>,
    },
    /// Re-create the project from templates on the host and reload.
    Initialize {
        /// Reply channel.
        reply: Reply<()>,
    },
}

/// Point-in-time view of a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSnapshot {
    /// Widget instance id.
    pub usage_id: String,
    /// Exercise language.
    pub language: Language,
    /// Exercise prompt.
    pub question: String,
    /// Project files, active file and dirty set.
    pub project: ProjectState,
    /// Summary of the project.
    pub structure: ProjectStructure,
    /// Whether a submission or test run is pending.
    pub is_submitting: bool,
    /// Results of the last test run.
    pub test_results: Option<TestReport>,
}

/// Cloneable handle to a running widget.
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    usage_id: String,
    commands: mpsc::Sender<WidgetCommand>,
    events: EventBroadcaster,
    bridge: EditorBridge,
}

impl WidgetHandle {
    /// Widget instance id.
    #[must_use]
    pub fn usage_id(&self) -> &str {
        &self.usage_id
    }

    /// The widget's UI event stream.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// The widget's editor bridge.
    #[must_use]
    pub const fn bridge(&self) -> &EditorBridge {
        &self.bridge
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> WidgetCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| WidgetError::widget_unavailable(&self.usage_id))?;
        rx.await
            .map_err(|_| WidgetError::widget_unavailable(&self.usage_id))
    }

    /// Returns the widget's current state.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::WidgetUnavailable` if the widget task has stopped.
    pub async fn snapshot(&self) -> Result<WidgetSnapshot> {
        self.call(|reply| WidgetCommand::Snapshot { reply }).await
    }

    /// Reloads the project from the host.
    ///
    /// # Errors
    ///
    /// Returns the host error, or `WidgetError::WidgetUnavailable`.
    pub async fn load(&self) -> Result<()> {
        self.call(|reply| WidgetCommand::Load { reply }).await?
    }

    /// Adds a file and makes it current.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFileName` or `DuplicateFile`. Host failures are
    /// reported as alerts instead.
    pub async fn create_file(&self, filename: &str, content: &str) -> Result<()> {
        let (filename, content) = (filename.to_string(), content.to_string());
        self.call(|reply| WidgetCommand::CreateFile {
            filename,
            content,
            reply,
        })
        .await?
    }

    /// Removes a file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or `ProtectedFile`.
    pub async fn delete_file(&self, filename: &str) -> Result<()> {
        let filename = filename.to_string();
        self.call(|reply| WidgetCommand::DeleteFile { filename, reply })
            .await?
    }

    /// Renames a file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound`, `DuplicateFile`, `InvalidFileName` or
    /// `ProtectedFile`.
    pub async fn rename_file(&self, old_filename: &str, new_filename: &str) -> Result<()> {
        let (old_filename, new_filename) = (old_filename.to_string(), new_filename.to_string());
        self.call(|reply| WidgetCommand::RenameFile {
            old_filename,
            new_filename,
            reply,
        })
        .await?
    }

    /// Makes a file current.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound`.
    pub async fn switch_file(&self, filename: &str) -> Result<()> {
        let filename = filename.to_string();
        self.call(|reply| WidgetCommand::SwitchFile { filename, reply })
            .await?
    }

    /// Persists buffered editor content now.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::WidgetUnavailable` if the widget task has stopped.
    pub async fn save(&self) -> Result<()> {
        self.call(|reply| WidgetCommand::Save { reply }).await?
    }

    /// Starts a submission. Results arrive as events.
    ///
    /// # Errors
    ///
    /// Returns `EmptySubmission`, or `SubmissionInProgress` while another
    /// job is pending.
    pub async fn submit(&self) -> Result<()> {
        self.call(|reply| WidgetCommand::Submit { reply }).await?
    }

    /// Starts a test run. Results arrive as events.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionInProgress` while another job is pending.
    pub async fn run_tests(&self) -> Result<()> {
        self.call(|reply| WidgetCommand::RunTests { reply }).await?
    }

    /// Clears the learner's state on the host and reloads.
    ///
    /// # Errors
    ///
    /// Returns the host error.
    pub async fn reset(&self) -> Result<()> {
        self.call(|reply| WidgetCommand::Reset { reply }).await?
    }

    /// Re-creates the project from templates on the host and reloads.
    ///
    /// # Errors
    ///
    /// Returns the host error.
    pub async fn initialize(&self) -> Result<()> {
        self.call(|reply| WidgetCommand::Initialize { reply }).await?
    }
}

// ============================================================================
// Auto-save buffer
// ============================================================================

/// Latest unsaved editor content per file, with one shared quiet deadline.
#[derive(Debug, Default)]
struct AutoSaveBuffer {
    pending: BTreeMap<String, String>,
    deadline: Option<Instant>,
}

impl AutoSaveBuffer {
    fn buffer(&mut self, filename: String, content: String, quiet: Duration) {
        self.pending.insert(filename, content);
        self.deadline = Some(Instant::now() + quiet);
    }

    fn take(&mut self) -> BTreeMap<String, String> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    fn discard(&mut self, filename: &str) {
        self.pending.remove(filename);
        if self.pending.is_empty() {
            self.deadline = None;
        }
    }

    fn rename(&mut self, old: &str, new: &str) {
        if let Some(content) = self.pending.remove(old) {
            self.pending.insert(new.to_string(), content);
        }
    }

    fn get(&self, filename: &str) -> Option<&String> {
        self.pending.get(filename)
    }
}

// ============================================================================
// Widget
// ============================================================================

enum Step {
    Command(WidgetCommand),
    Editor(EditorEvent),
    TestsFinished(TestReport),
    AutoSave,
    Shutdown,
}

/// One widget instance.
pub struct Widget<H: HostApi + 'static> {
    config: Config,
    language: Language,
    host: Arc<H>,
    project: ProjectState,
    bridge: EditorBridge,
    editor_events: mpsc::UnboundedReceiver<EditorEvent>,
    events: EventBroadcaster,
    autosave: AutoSaveBuffer,
    busy: Arc<AtomicBool>,
    test_results: Option<TestReport>,
    reports_tx: mpsc::UnboundedSender<TestReport>,
    reports_rx: mpsc::UnboundedReceiver<TestReport>,
}

impl<H: HostApi + 'static> Widget<H> {
    /// Creates a widget with a local starting project.
    ///
    /// The project holds the language's templates, or its entry file when
    /// none are configured, until [`WidgetHandle::load`] fetches the stored one.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::InvalidFileName` if a template name is rejected.
    pub fn new(config: Config, host: Arc<H>) -> Result<Self> {
        let language = config.language;
        let project = match config.templates().filter(|t| !t.is_empty()) {
            Some(templates) => ProjectState::from_templates(config.enable_multi_file, templates)?,
            None => ProjectState::with_main_file(config.enable_multi_file, language),
        };
        let (bridge, editor_events) = EditorBridge::new();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            language,
            host,
            project,
            bridge,
            editor_events,
            events: EventBroadcaster::default(),
            autosave: AutoSaveBuffer::default(),
            busy: Arc::new(AtomicBool::new(false)),
            test_results: None,
            reports_tx,
            reports_rx,
        })
    }

    /// Starts the widget task and returns a handle to it.
    ///
    /// The task stops when every handle is dropped.
    #[must_use]
    pub fn spawn(self) -> WidgetHandle {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = WidgetHandle {
            usage_id: self.config.usage_id.clone(),
            commands,
            events: self.events.clone(),
            bridge: self.bridge.clone(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<WidgetCommand>) {
        info!(
            usage_id = %self.config.usage_id,
            language = %self.language,
            files = self.project.len(),
            "Widget started"
        );

        loop {
            let deadline = self.autosave.deadline;
            // Editor events already queued are handled before later commands.
            let step = tokio::select! {
                biased;
                Some(event) = self.editor_events.recv() => Step::Editor(event),
                Some(report) = self.reports_rx.recv() => Step::TestsFinished(report),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::AutoSave
                }
                command = commands.recv() => command.map_or(Step::Shutdown, Step::Command),
            };

            match step {
                Step::Command(command) => self.handle_command(command).await,
                Step::Editor(event) => self.handle_editor_event(event).await,
                Step::TestsFinished(report) => self.test_results = Some(report),
                Step::AutoSave => self.flush_autosave().await,
                Step::Shutdown => break,
            }
        }

        info!(usage_id = %self.config.usage_id, "Widget stopped");
    }

    async fn handle_command(&mut self, command: WidgetCommand) {
        // A dropped reply receiver means the caller stopped waiting.
        match command {
            WidgetCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            WidgetCommand::Load { reply } => {
                let _ = reply.send(self.load_from_host().await);
            }
            WidgetCommand::CreateFile {
                filename,
                content,
                reply,
            } => {
                let _ = reply.send(self.create_file(&filename, content).await);
            }
            WidgetCommand::DeleteFile { filename, reply } => {
                let _ = reply.send(self.delete_file(&filename).await);
            }
            WidgetCommand::RenameFile {
                old_filename,
                new_filename,
                reply,
            } => {
                let _ = reply.send(self.rename_file(&old_filename, &new_filename).await);
            }
            WidgetCommand::SwitchFile { filename, reply } => {
                let _ = reply.send(self.switch_file(&filename).await);
            }
            WidgetCommand::Save { reply } => {
                self.flush_autosave().await;
                let _ = reply.send(Ok(()));
            }
            WidgetCommand::Submit { reply } => {
                let _ = reply.send(self.submit().await);
            }
            WidgetCommand::RunTests { reply } => {
                let _ = reply.send(self.run_tests().await);
            }
            WidgetCommand::Reset { reply } => {
                let _ = reply.send(self.reset().await);
            }
            WidgetCommand::Initialize { reply } => {
                let _ = reply.send(self.initialize().await);
            }
        }
    }

    fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            usage_id: self.config.usage_id.clone(),
            language: self.language,
            question: self.config.question.clone(),
            project: self.project.clone(),
            structure: self.project.structure(),
            is_submitting: self.busy.load(Ordering::SeqCst),
            test_results: self.test_results.clone(),
        }
    }

    fn publish_files(&self) {
        self.events.send(WidgetEvent::files_changed(&self.project));
    }

    fn alert(&self, error: &WidgetError) {
        warn!(error = %error, category = %error.category(), "Host operation failed");
        self.events.send(WidgetEvent::alert(error.alert_text()));
    }

    /// Recreates every editor model from the project and shows the current file.
    fn sync_editor(&self) {
        for (name, record) in self.project.files() {
            let content = self.autosave.get(name).unwrap_or(&record.content);
            self.bridge
                .create_model(name, content, record.file_type.editor_language());
        }
        if let Some(current) = self.project.current_file() {
            self.bridge.switch_to(current);
        }
    }

    // ------------------------------------------------------------------------
    // Editor events and auto-save
    // ------------------------------------------------------------------------

    async fn handle_editor_event(&mut self, event: EditorEvent) {
        match event {
            EditorEvent::Ready => {
                debug!("Editor ready, syncing models");
                self.sync_editor();
            }
            EditorEvent::ContentChanged { filename, content } => {
                if !self.project.contains(&filename) {
                    debug!(%filename, "Content change for unknown file ignored");
                    return;
                }
                let newly_dirty = !self.project.is_dirty(&filename);
                self.project.mark_dirty(&filename);
                self.autosave
                    .buffer(filename, content, self.config.auto_save_quiet());
                if newly_dirty {
                    self.publish_files();
                }
            }
            EditorEvent::FileSwitched { filename } => {
                self.flush_autosave().await;
                match self.project.set_current_file(&filename) {
                    Ok(()) => self.publish_files(),
                    Err(e) => warn!(error = %e, "Editor switched to unknown file"),
                }
            }
        }
    }

    /// Commits buffered content and persists it. Dirty flags clear only on
    /// host acknowledgement.
    async fn flush_autosave(&mut self) {
        let pending = self.autosave.take();
        if pending.is_empty() {
            return;
        }

        for (filename, content) in pending {
            if self.project.update_content(&filename, content.as_str()).is_err() {
                debug!(%filename, "Dropping buffered content of removed file");
                continue;
            }
            match self.host.save_file(&filename, &content).await {
                Ok(()) => {
                    self.project.clear_dirty(&filename);
                    debug!(%filename, "File saved");
                }
                Err(e) => self.alert(&e),
            }
        }
        self.publish_files();
    }

    // ------------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------------

    async fn create_file(&mut self, filename: &str, content: String) -> Result<()> {
        self.flush_autosave().await;
        let record = FileRecord::for_name(filename, content);
        let file_type = record.file_type;
        let content = record.content.clone();

        self.project.add_file(filename, record)?;
        self.project.set_current_file(filename)?;
        info!(%filename, %file_type, "File created");

        self.bridge
            .create_model(filename, &content, file_type.editor_language());
        self.bridge.switch_to(filename);
        if let Err(e) = self.host.create_file(filename, &content, file_type).await {
            self.alert(&e);
        }
        self.publish_files();
        Ok(())
    }

    async fn delete_file(&mut self, filename: &str) -> Result<()> {
        if is_protected(filename) {
            return Err(WidgetError::protected_file(filename, "delete"));
        }
        let was_current = self.project.current_file() == Some(filename);
        self.project.delete_file(filename)?;
        self.autosave.discard(filename);
        info!(%filename, "File deleted");

        self.bridge.delete_model(filename);
        if was_current {
            if let Some(current) = self.project.current_file() {
                self.bridge.switch_to(current);
            }
        }
        if let Err(e) = self.host.delete_file(filename).await {
            self.alert(&e);
        }
        self.publish_files();
        Ok(())
    }

    async fn rename_file(&mut self, old_filename: &str, new_filename: &str) -> Result<()> {
        if is_protected(old_filename) {
            return Err(WidgetError::protected_file(old_filename, "rename"));
        }
        self.project.rename_file(old_filename, new_filename)?;
        self.autosave.rename(old_filename, new_filename);
        info!(from = %old_filename, to = %new_filename, "File renamed");

        self.bridge.rename_model(old_filename, new_filename);
        if let Err(e) = self.host.rename_file(old_filename, new_filename).await {
            self.alert(&e);
        }
        self.publish_files();
        Ok(())
    }

    async fn switch_file(&mut self, filename: &str) -> Result<()> {
        self.flush_autosave().await;
        self.project.set_current_file(filename)?;
        self.bridge.switch_to(filename);
        self.publish_files();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    async fn submit(&mut self) -> Result<()> {
        self.flush_autosave().await;
        let snapshot = self.project.snapshot_for_submission();
        if snapshot.is_empty() {
            return Err(WidgetError::EmptySubmission);
        }
        let guard = BusyGuard::acquire(&self.busy, &self.events)
            .ok_or(WidgetError::SubmissionInProgress)?;

        let job = SubmissionJob::new(
            Arc::clone(&self.host),
            self.events.clone(),
            self.config.pipeline_settings(),
            self.language,
            snapshot,
        );
        info!(usage_id = %self.config.usage_id, "Submission started");
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = job.run().await {
                debug!(error = %e, "Submission ended without output");
            }
        });
        Ok(())
    }

    async fn run_tests(&mut self) -> Result<()> {
        self.flush_autosave().await;
        let guard = BusyGuard::acquire(&self.busy, &self.events)
            .ok_or(WidgetError::SubmissionInProgress)?;

        let job = TestJob::new(
            Arc::clone(&self.host),
            self.events.clone(),
            self.config.pipeline_settings(),
            self.language,
            self.project.snapshot_for_submission(),
            self.config.test_cases.clone(),
        );
        let reports = self.reports_tx.clone();
        info!(
            usage_id = %self.config.usage_id,
            local_cases = self.config.test_cases.len(),
            "Test run started"
        );
        tokio::spawn(async move {
            let _guard = guard;
            if let Ok(report) = job.run().await {
                // The widget outlives its jobs unless it is shutting down.
                let _ = reports.send(report);
            }
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Project lifecycle
    // ------------------------------------------------------------------------

    async fn load_from_host(&mut self) -> Result<()> {
        let response = self.host.project_structure().await?;
        let multi = self.config.enable_multi_file;

        if let Some(label) = response.language.as_deref() {
            if Language::from_str_case_insensitive(label) != Some(self.language) {
                warn!(host = %label, configured = %self.language, "Host language differs from configuration");
            }
        }

        let project = if response.project_files.is_empty() {
            match self.config.templates().filter(|t| !t.is_empty()) {
                Some(templates) => {
                    let project = ProjectState::from_templates(multi, templates)?;
                    for (name, record) in project.files() {
                        let created = self
                            .host
                            .create_file(name, &record.content, record.file_type)
                            .await;
                        if let Err(e) = created {
                            self.alert(&e);
                        }
                    }
                    project
                }
                None => ProjectState::with_main_file(multi, self.language),
            }
        } else {
            ProjectState::with_files(multi, response.project_files)?
        };

        self.autosave.take();
        self.project = project;
        self.sync_editor();
        self.publish_files();
        info!(
            usage_id = %self.config.usage_id,
            files = self.project.len(),
            "Project loaded"
        );
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.host.reset().await?;
        self.test_results = None;
        info!(usage_id = %self.config.usage_id, "Project reset on host");
        self.load_from_host().await
    }

    async fn initialize(&mut self) -> Result<()> {
        let response = self.host.initialize_project().await?;
        if !response.success {
            return Err(WidgetError::server(
                handlers::INITIALIZE_PROJECT,
                "Failed to initialize project",
            ));
        }
        info!(files_created = response.files_created, "Project initialized on host");
        self.load_from_host().await
    }
}

// ============================================================================
// Tests
// ============================================================================
