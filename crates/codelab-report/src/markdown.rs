//! Markdown rendering of test results.
//!
//! This module provides the [`MarkdownGenerator`] struct for converting a
//! [`TestReport`] into the Markdown shown in the widget's test-results panel:
//!
//! - A summary table with counts and pass rate
//! - One section per test case with expected and actual output
//! - A footer with the generation timestamp
//!
//! # Example
//!
//! ```rust
//! use codelab_report::{MarkdownGenerator, TestReport};
//!
//! let report = TestReport::new(vec![]);
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("*No test cases defined.*"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{TestReport, TestResult};

/// Maximum length of an output value shown inline.
const MAX_OUTPUT_DISPLAY_LENGTH: usize = 200;

/// Generates the Markdown test-results panel.
pub struct MarkdownGenerator<'a> {
    report: &'a TestReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a TestReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "## Test Results\n");
        self.write_summary(&mut output);
        self.write_results(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Total | {} |", summary.total);
        let _ = writeln!(output, "| Passed | {} |", summary.passed);
        let _ = writeln!(output, "| Failed | {} |", summary.failed);
        let _ = writeln!(output, "| Pass Rate | {:.1}% |", summary.pass_rate);
        let _ = writeln!(output);
    }

    fn write_results(&self, output: &mut String) {
        if self.report.results.is_empty() {
            let _ = writeln!(output, "*No test cases defined.*\n");
            return;
        }
        for result in &self.report.results {
            Self::write_result(output, result);
        }
    }

    fn write_result(output: &mut String, result: &TestResult) {
        let icon = if result.passed { "&#9989;" } else { "&#10060;" };
        let _ = writeln!(
            output,
            "### {icon} {}. {}\n",
            result.test_number,
            escape_markdown(&result.test_name)
        );

        if let Some(description) = result.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = writeln!(output, "{}\n", escape_markdown(description));
        }
        if let Some(expected) = &result.expected_output {
            let _ = writeln!(output, "- **Expected**: {}", inline_code(expected));
        }
        if let Some(actual) = &result.actual_output {
            let _ = writeln!(output, "- **Actual**: {}", inline_code(actual));
        }
        if let Some(error) = &result.error {
            let _ = writeln!(output, "- **Error**: {}", escape_markdown(error));
        }
        if let Some(seconds) = result.execution_time {
            let _ = writeln!(output, "- **Time**: {seconds:.2}s");
        }
        let _ = writeln!(output);
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---\n");
        let _ = writeln!(
            output,
            "*Generated at {}*",
            format_timestamp(&self.report.generated_at)
        );
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a timestamp as "YYYY-MM-DD HH:MM:SS UTC".
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Renders program output as inline code, one line, truncated.
fn inline_code(text: &str) -> String {
    if text.is_empty() {
        return "*(empty)*".to_string();
    }
    let flattened = text.replace('\n', "\u{23ce}").replace('`', "'");
    format!("`{}`", truncate(&flattened, MAX_OUTPUT_DISPLAY_LENGTH))
}

/// Truncates on a character boundary, adding an ellipsis if needed.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

/// Escapes special Markdown characters in text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
