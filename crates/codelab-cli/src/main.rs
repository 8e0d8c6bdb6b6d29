//! Code-Lab CLI
//!
//! Submits local code through a code-lab host, runs its test cases, and
//! serves widget instances over HTTP and WebSocket.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use codelab_report::MarkdownGenerator;
use codelab_widget::{
    create_router, Config, DisplayedOutput, EventBroadcaster, FileRecord, HostClient, Language,
    ProjectState, SubmissionJob, TestJob, Widget, WidgetRegistry,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Default port for the widget server.
const DEFAULT_PORT: u16 = 3000;

/// Largest source file picked up from a project directory.
const MAX_SOURCE_BYTES: u64 = 1024 * 1024;

/// Code-Lab - coding exercise widget
///
/// Runs learner code in the execution sandbox behind a code-lab host,
/// fetches AI feedback, and serves widget instances to editor frontends.
#[derive(Parser, Debug)]
#[command(name = "codelab")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: codelab.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a file or project directory and print output and feedback
    Run {
        /// Source file or project directory
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        /// Exercise language (overrides the configuration)
        #[arg(short, long)]
        language: Option<String>,

        /// Run the test cases instead of a plain submission
        #[arg(long)]
        tests: bool,

        /// Write the test report as JSON to this file
        #[arg(long, value_name = "FILE", requires = "tests")]
        json: Option<PathBuf>,
    },

    /// Serve the configured widget over HTTP and WebSocket
    Serve {
        /// Port for the HTTP server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Load, validate and print the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match args.command {
        Command::Run {
            path,
            language,
            tests,
            json,
        } => run(args.config.as_deref(), &path, language.as_deref(), tests, json).await,
        Command::Serve { port } => serve(args.config.as_deref(), port).await,
        Command::CheckConfig => check_config(args.config.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Submits code once, or runs every test case, and prints the results.
async fn run(
    config_path: Option<&str>,
    path: &Path,
    language: Option<&str>,
    tests: bool,
    json: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(label) = language {
        config.language = Language::from_str_case_insensitive(label).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown language '{label}'\n\nSuggestion: Use one of Python, JavaScript, Java, C++ or HTML/CSS"
            )
        })?;
    }

    let project = load_project(path, &config)?;
    tracing::info!(
        path = %path.display(),
        files = project.len(),
        language = %config.language,
        "Project loaded"
    );

    let host = Arc::new(HostClient::new(
        &config.handler_base_url,
        config.request_timeout(),
    )?);
    let events = EventBroadcaster::default();
    let snapshot = project.snapshot_for_submission();

    if tests {
        let job = TestJob::new(
            host,
            events,
            config.pipeline_settings(),
            config.language,
            snapshot,
            config.test_cases.clone(),
        );
        let report = job.run().await?;
        println!("{}", MarkdownGenerator::new(&report).generate());

        if let Some(json_path) = json {
            report.write_json(&json_path, true)?;
            println!("JSON report written to {}", json_path.display());
        }
        if !report.summary.all_passed() {
            anyhow::bail!(
                "{} of {} test cases failed",
                report.summary.failed,
                report.summary.total
            );
        }
        return Ok(());
    }

    println!("Submitting {} file(s)...", project.len());
    let job = SubmissionJob::new(
        host,
        events,
        config.pipeline_settings(),
        config.language,
        snapshot,
    );
    let outcome = job.run().await?;

    match &outcome.displayed {
        DisplayedOutput::Text { stdout, stderr } => {
            println!();
            println!("Output:");
            println!("{stdout}");
            if !stderr.is_empty() {
                println!();
                println!("Errors:");
                println!("{stderr}");
            }
        }
        DisplayedOutput::Preview { html } => {
            println!();
            println!("Preview ({} bytes of HTML)", html.len());
        }
    }

    println!();
    match &outcome.feedback {
        Some(markdown) => {
            println!("Feedback:");
            println!("{markdown}");
        }
        None => println!("Feedback: unavailable"),
    }
    Ok(())
}

/// Hosts the configured widget until interrupted.
async fn serve(config_path: Option<&str>, port: u16) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    print_config(&config);

    let host = HostClient::new(&config.handler_base_url, config.request_timeout())?;
    let handle = Widget::new(config, Arc::new(host))?.spawn();
    if let Err(e) = handle.load().await {
        tracing::warn!(error = %e, "Could not load the stored project, starting locally");
    }

    let mut registry = WidgetRegistry::new();
    registry.insert(handle);
    let router = create_router(registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Choose another port with --port"
        )
    })?;
    println!();
    println!("Serving on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;
    Ok(())
}

/// Loads the configuration, which also validates it, and prints it.
fn check_config(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    print_config(&config);
    println!();
    println!("Configuration is valid");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Widget: {}", config.usage_id);
    println!("  Handler URL: {}", config.handler_base_url);
    println!("  Language: {}", config.language);
    println!("  Multi-file: {}", config.enable_multi_file);
    println!(
        "  Polling: first after {}ms, then every {}ms, at most {} polls",
        config.poll_initial_delay_ms, config.poll_interval_ms, config.max_poll_retries
    );
    println!("  Test cases: {}", config.test_cases.len());
}

/// Builds a project from one source file or from every source file under a
/// directory. Hidden entries and build output are skipped.
fn load_project(path: &Path, config: &Config) -> anyhow::Result<ProjectState> {
    if path.is_file() {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file path: '{}'", path.display()))?;
        let content = std::fs::read_to_string(path)?;
        let mut files = BTreeMap::new();
        files.insert(name.to_string(), FileRecord::for_name(name, content));
        return Ok(ProjectState::with_files(false, files)?);
    }

    let mut files = BTreeMap::new();
    let walker = WalkDir::new(path).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        entry.depth() == 0 || !(name.starts_with('.') || name == "target" || name == "node_modules")
    });
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.metadata()?.len() > MAX_SOURCE_BYTES {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(path) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name == "codelab.json" || !codelab_widget::project::is_valid_file_name(&name) {
            tracing::debug!(file = %name, "Skipping file");
            continue;
        }
        // Binary files are not source.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            tracing::debug!(file = %name, "Skipping non-UTF-8 file");
            continue;
        };
        files.insert(name.clone(), FileRecord::for_name(&name, content));
    }

    if files.is_empty() {
        anyhow::bail!(
            "No source files found in '{}'\n\nSuggestion: Point codelab run at a source file or a project directory",
            path.display()
        );
    }

    let mut project = ProjectState::with_files(config.enable_multi_file, files)?;
    let main_file = config.language.main_file();
    if project.contains(main_file) {
        project.set_current_file(main_file)?;
    }
    Ok(project)
}
