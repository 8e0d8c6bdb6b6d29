//! Code-lab test reports
//!
//! This crate provides the test-case model of a code-lab exercise, the
//! comparison rules used to decide whether a program's output passes, and
//! generators that render a set of results as Markdown or JSON.
//!
//! # Types
//!
//! - [`TestCase`] - An expected-output check configured by the exercise author
//! - [`ComparisonMode`] - How actual output is compared with the expectation
//! - [`TestRun`] - Captured output of one execution of the learner's program
//! - [`TestResult`] - Outcome of one test case
//! - [`TestSummary`] - Pass/fail counts and pass rate
//! - [`TestReport`] - Results plus summary, ready for rendering
//!
//! # Generators
//!
//! - [`MarkdownGenerator`] - Generate the Markdown test-results panel
//! - [`TestReport::to_json`] and [`TestReport::write_json`] - JSON rendering
//!
//! # Example
//!
//! ```rust
//! use codelab_report::{TestCase, TestReport, TestRun, MarkdownGenerator};
//!
//! let case = TestCase::new("prints one", "1");
//! let run = TestRun::accepted("1", 0.05);
//! let result = case.evaluate(1, &run);
//! assert!(result.passed);
//!
//! let report = TestReport::new(vec![result]);
//! assert_eq!(report.summary.passed, 1);
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("## Test Results"));
//! ```

mod markdown;

pub use markdown::MarkdownGenerator;

use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sandbox status id of a run that completed normally.
pub const STATUS_ACCEPTED: i64 = 3;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Test Cases
// ============================================================================

/// How a test's actual output is compared with its expected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Byte-for-byte equality.
    ExactMatch,
    /// Equality after trimming surrounding whitespace on both sides.
    #[default]
    OutputComparison,
    /// The expected text occurs somewhere in the output.
    Contains,
    /// The expected text is a regular expression that must match the output.
    /// An invalid pattern never matches.
    Regex,
}

impl ComparisonMode {
    /// Returns `true` if `actual` satisfies `expected` under this mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use codelab_report::ComparisonMode;
    ///
    /// assert!(ComparisonMode::OutputComparison.matches(" 42\n", "42"));
    /// assert!(!ComparisonMode::ExactMatch.matches("42\n", "42"));
    /// assert!(ComparisonMode::Regex.matches("took 12ms", r"\d+ms"));
    /// assert!(!ComparisonMode::Regex.matches("anything", "("));
    /// ```
    #[must_use]
    pub fn matches(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::ExactMatch => actual == expected,
            Self::OutputComparison => actual.trim() == expected.trim(),
            Self::Contains => actual.contains(expected),
            Self::Regex => Regex::new(expected).is_ok_and(|re| re.is_match(actual)),
        }
    }
}

/// An expected-output check configured by the exercise author.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Short name; results fall back to `Test N` when empty.
    #[serde(default)]
    pub name: String,

    /// Longer description shown with the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Text fed to the program's standard input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Output the program should produce.
    #[serde(default, alias = "expected_output")]
    pub expected_output: String,

    /// Per-case time limit in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Comparison rule.
    #[serde(rename = "type", default)]
    pub comparison: ComparisonMode,
}

impl TestCase {
    /// Creates a trimmed-output test case.
    #[must_use]
    pub fn new(name: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected_output: expected_output.into(),
            ..Self::default()
        }
    }

    /// Sets the comparison rule.
    #[must_use]
    pub const fn with_comparison(mut self, comparison: ComparisonMode) -> Self {
        self.comparison = comparison;
        self
    }

    /// Sets the standard input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Name used in results: the configured name or `Test N`.
    #[must_use]
    pub fn display_name(&self, number: u32) -> String {
        if self.name.trim().is_empty() {
            format!("Test {number}")
        } else {
            self.name.clone()
        }
    }

    /// Judges one run of the program against this case.
    ///
    /// A run that did not finish as accepted and produced compiler output or
    /// standard error fails with that text as its error, before any output
    /// comparison.
    #[must_use]
    pub fn evaluate(&self, number: u32, run: &TestRun) -> TestResult {
        let accepted = run.status_id == Some(STATUS_ACCEPTED);
        let mut result = TestResult {
            test_number: number,
            test_name: self.display_name(number),
            description: self.description.clone(),
            passed: false,
            expected_output: Some(self.expected_output.clone()),
            actual_output: Some(run.stdout.clone()),
            error: None,
            execution_time: Some(run.execution_time_seconds),
            exit_code: run.status_id,
        };

        if !accepted && !run.compile_output.trim().is_empty() {
            result.actual_output = Some(String::new());
            result.error = Some(format!("Compilation error: {}", run.compile_output.trim()));
        } else if !accepted && !run.stderr.trim().is_empty() {
            result.error = Some(format!("Runtime error: {}", run.stderr.trim()));
        } else {
            result.passed = self.comparison.matches(&run.stdout, &self.expected_output);
        }
        result
    }

    /// Records a case whose program could not be run at all.
    #[must_use]
    pub fn errored(
        &self,
        number: u32,
        error: impl Into<String>,
        execution_time_seconds: f64,
    ) -> TestResult {
        TestResult {
            test_number: number,
            test_name: self.display_name(number),
            description: self.description.clone(),
            passed: false,
            expected_output: Some(self.expected_output.clone()),
            actual_output: None,
            error: Some(error.into()),
            execution_time: Some(execution_time_seconds),
            exit_code: None,
        }
    }
}

/// Captured output of one execution of the learner's program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestRun {
    /// Standard output as displayed to the learner.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Compiler output.
    pub compile_output: String,
    /// Sandbox terminal status id.
    pub status_id: Option<i64>,
    /// Wall-clock time from submission to result.
    pub execution_time_seconds: f64,
}

impl TestRun {
    /// A run that finished normally with the given output.
    #[must_use]
    pub fn accepted(stdout: impl Into<String>, execution_time_seconds: f64) -> Self {
        Self {
            stdout: stdout.into(),
            status_id: Some(STATUS_ACCEPTED),
            execution_time_seconds,
            ..Self::default()
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one test case.
///
/// Field names follow the host's `run_test_cases` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestResult {
    /// 1-based position of the case.
    #[serde(default)]
    pub test_number: u32,

    /// Display name of the case.
    #[serde(default)]
    pub test_name: String,

    /// Description of the case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the case passed.
    #[serde(default)]
    pub passed: bool,

    /// Expected output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,

    /// Output the program produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,

    /// Why the case could not be judged, if it could not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,

    /// Sandbox terminal status id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

/// Pass/fail counts of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TestSummary {
    /// Number of cases.
    pub total: usize,
    /// Number of passing cases.
    pub passed: usize,
    /// Number of failing cases.
    pub failed: usize,
    /// Percentage of passing cases, 0 to 100.
    pub pass_rate: f64,
}

impl TestSummary {
    /// Tallies a set of results.
    ///
    /// # Examples
    ///
    /// ```
    /// use codelab_report::{TestResult, TestSummary};
    ///
    /// let results = vec![
    ///     TestResult { passed: true, ..TestResult::default() },
    ///     TestResult { passed: false, ..TestResult::default() },
    /// ];
    /// let summary = TestSummary::from_results(&results);
    /// assert_eq!(summary.failed, 1);
    /// assert!((summary.pass_rate - 50.0).abs() < f64::EPSILON);
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_results(results: &[TestResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64 * 100.0
        };
        Self {
            total,
            passed,
            failed: total - passed,
            pass_rate,
        }
    }

    /// Returns `true` if there was at least one case and every case passed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

/// Results of one test run together with their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Per-case results in case order.
    pub results: Vec<TestResult>,
    /// Tally of `results`.
    pub summary: TestSummary,
    /// When the run finished.
    pub generated_at: DateTime<Utc>,
}

impl TestReport {
    /// Builds a report stamped with the current time.
    #[must_use]
    pub fn new(results: Vec<TestResult>) -> Self {
        Self::at_time(Utc::now(), results)
    }

    /// Builds a report with an explicit timestamp.
    #[must_use]
    pub fn at_time(generated_at: DateTime<Utc>, results: Vec<TestResult>) -> Self {
        let summary = TestSummary::from_results(&results);
        Self {
            results,
            summary,
            generated_at,
        }
    }

    /// Serializes the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report as JSON to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails, or
    /// [`ReportError::Io`] if the file cannot be written.
    pub fn write_json(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.to_json()?
        } else {
            serde_json::to_string(self)?
        };
        std::fs::write(path, json)?;
        Ok(())
    }
}
