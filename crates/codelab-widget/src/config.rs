//! Configuration types for the code-lab widget.
//!
//! This module provides the configuration read from `codelab.json`: where
//! the host handlers live, which language the exercise uses, how the
//! submission pipeline paces its polling, and the starter templates and
//! local test cases of the exercise.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use codelab_report::TestCase;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WidgetError};
use crate::language::{FileType, Language};
use crate::pipeline::PipelineSettings;
use crate::project::is_valid_file_name;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "codelab.json";

/// Default base URL of the host handlers.
fn default_handler_base_url() -> String {
    "http://localhost:8000/handler".to_string()
}

/// Default widget usage id.
fn default_usage_id() -> String {
    "codelab".to_string()
}

/// Default delay before the first poll, in milliseconds.
const fn default_poll_initial_delay_ms() -> u64 {
    2000
}

/// Default delay between polls, in milliseconds.
const fn default_poll_interval_ms() -> u64 {
    1000
}

/// Default maximum number of polls per submission.
const fn default_max_poll_retries() -> u32 {
    5
}

/// Default auto-save quiescence window, in milliseconds.
const fn default_auto_save_quiet_ms() -> u64 {
    2000
}

/// Default HTTP request timeout, in seconds.
const fn default_request_timeout_secs() -> u64 {
    10
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for a code-lab widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL under which the host exposes its handlers
    /// (`{handlerBaseUrl}/{handler_name}`).
    #[serde(default = "default_handler_base_url")]
    pub handler_base_url: String,

    /// Usage id of the widget instance; keys the server's dispatch table.
    #[serde(default = "default_usage_id")]
    pub usage_id: String,

    /// Exercise language.
    #[serde(default)]
    pub language: Language,

    /// Whether the learner may manage several files.
    #[serde(default = "default_true")]
    pub enable_multi_file: bool,

    /// Exercise prompt shown above the editor.
    #[serde(default)]
    pub question: String,

    /// Delay before the first poll of a submission, in milliseconds.
    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,

    /// Delay between polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of polls before a submission times out.
    #[serde(default = "default_max_poll_retries")]
    pub max_poll_retries: u32,

    /// Quiescence window before buffered editor content is saved, in milliseconds.
    #[serde(default = "default_auto_save_quiet_ms")]
    pub auto_save_quiet_ms: u64,

    /// Timeout of each host request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Starter files per language label, keyed by filename.
    #[serde(default)]
    pub file_templates: BTreeMap<String, BTreeMap<String, FileTemplate>>,

    /// Test cases evaluated locally when the learner runs the tests.
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler_base_url: default_handler_base_url(),
            usage_id: default_usage_id(),
            language: Language::default(),
            enable_multi_file: default_true(),
            question: String::new(),
            poll_initial_delay_ms: default_poll_initial_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_retries: default_max_poll_retries(),
            auto_save_quiet_ms: default_auto_save_quiet_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            file_templates: BTreeMap::new(),
            test_cases: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `codelab.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            WidgetError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `codelab.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::ConfigParseError` if the file exists but contains
    /// invalid JSON or an unknown language.
    ///
    /// Returns `WidgetError::ConfigValidationError` if the values are invalid
    /// (e.g., zero poll interval, empty handler URL).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(WidgetError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| WidgetError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.handler_base_url.trim().is_empty() {
            return Err(WidgetError::config_validation(
                "handlerBaseUrl must not be empty",
                "Set handlerBaseUrl to the URL prefix of the host handlers in your codelab.json",
            ));
        }

        if self.usage_id.trim().is_empty() {
            return Err(WidgetError::config_validation(
                "usageId must not be empty",
                "Give the widget a usageId in your codelab.json",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(WidgetError::config_validation(
                "pollIntervalMs must be greater than 0",
                "Set pollIntervalMs to at least 1 in your codelab.json",
            ));
        }

        if self.max_poll_retries == 0 {
            return Err(WidgetError::config_validation(
                "maxPollRetries must be greater than 0",
                "Set maxPollRetries to at least 1 in your codelab.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(WidgetError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your codelab.json",
            ));
        }

        for (language, templates) in &self.file_templates {
            if Language::from_str_case_insensitive(language).is_none() {
                return Err(WidgetError::config_validation(
                    format!("fileTemplates has an unknown language '{language}'"),
                    "Key fileTemplates by 'Python', 'JavaScript', 'Java', 'C++' or 'HTML/CSS'",
                ));
            }
            if let Some(name) = templates.keys().find(|name| !is_valid_file_name(name)) {
                return Err(WidgetError::config_validation(
                    format!("template filename '{name}' is invalid"),
                    "Use only letters, digits, '.', '_', '-' and '/' in template filenames",
                ));
            }
        }

        Ok(())
    }

    /// Returns the starter templates of the configured language, if any.
    #[must_use]
    pub fn templates(&self) -> Option<&BTreeMap<String, FileTemplate>> {
        self.file_templates
            .iter()
            .find(|(key, _)| Language::from_str_case_insensitive(key) == Some(self.language))
            .map(|(_, templates)| templates)
    }

    /// Timing parameters of the submission pipeline.
    #[must_use]
    pub const fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_retries: self.max_poll_retries,
        }
    }

    /// Auto-save quiescence window.
    #[must_use]
    pub const fn auto_save_quiet(&self) -> Duration {
        Duration::from_millis(self.auto_save_quiet_ms)
    }

    /// Timeout of each host request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A starter file instantiated into an empty project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTemplate {
    /// Initial content.
    #[serde(default)]
    pub content: String,

    /// Explicit type tag; inferred from the filename when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.handler_base_url, "http://localhost:8000/handler");
        assert_eq!(config.language, Language::Python);
        assert!(config.enable_multi_file);
        assert_eq!(config.poll_initial_delay_ms, 2000);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_poll_retries, 5);
        assert_eq!(config.auto_save_quiet_ms, 2000);
        assert_eq!(config.request_timeout_secs, 10);
        assert!(config.test_cases.is_empty());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.usage_id, "codelab");
        assert_eq!(config.max_poll_retries, 5);
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "handlerBaseUrl": "https://lms.example/xblock/handler",
            "language": "java",
            "enableMultiFile": false,
            "pollIntervalMs": 250,
            "fileTemplates": {
                "Java": {
                    "Main.java": {"content": "class Main {}"},
                    "Util.java": {"content": "", "type": "java"}
                }
            },
            "testCases": [
                {"name": "hello", "expectedOutput": "hi"}
            ]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.language, Language::Java);
        assert!(!config.enable_multi_file);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.poll_initial_delay_ms, 2000);
        let templates = config.templates().unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates["Main.java"].content, "class Main {}");
        assert_eq!(templates["Util.java"].file_type, Some(FileType::Java));
        assert_eq!(config.test_cases.len(), 1);
    }

    #[test]
    fn test_templates_for_other_language_ignored() {
        let json = r#"{
            "language": "Python",
            "fileTemplates": {"C++": {"main.cpp": {"content": ""}}}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.templates().is_none());
    }

    #[test]
    fn test_pipeline_settings_from_config() {
        let config = Config {
            poll_initial_delay_ms: 10,
            poll_interval_ms: 20,
            max_poll_retries: 3,
            ..Config::default()
        };
        let settings = config.pipeline_settings();
        assert_eq!(settings.initial_delay, Duration::from_millis(10));
        assert_eq!(settings.poll_interval, Duration::from_millis(20));
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn test_invalid_language_error() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{"language": "cobol"}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid language"));
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let config_path = std::env::temp_dir().join("test_codelab_valid.json");
        std::fs::write(&config_path, r#"{"language": "JavaScript", "usageId": "lab-1"}"#)
            .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.language, Language::JavaScript);
        assert_eq!(config.usage_id, "lab-1");
        assert_eq!(config.poll_interval_ms, 1000);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let config_path = std::env::temp_dir().join("test_codelab_invalid.json");
        std::fs::write(&config_path, "{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, WidgetError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/codelab.json")).unwrap();
        assert_eq!(config.language, Language::Python);
    }

    #[test]
    fn test_load_from_dir_finds_codelab_json() {
        let temp_dir = std::env::temp_dir().join("test_codelab_dir");
        std::fs::create_dir_all(&temp_dir).unwrap();
        let config_path = temp_dir.join("codelab.json");
        std::fs::write(&config_path, r#"{"question": "Print 1"}"#).unwrap();

        let config = Config::load_from_dir(&temp_dir).unwrap();
        assert_eq!(config.question, "Print 1");

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&temp_dir).ok();
    }

    #[test]
    fn test_config_validation_zero_poll_interval() {
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pollIntervalMs"));
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_config_validation_zero_retries() {
        let config = Config {
            max_poll_retries: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_base_url() {
        let config = Config {
            handler_base_url: "  ".to_string(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, WidgetError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_validation_bad_template_name() {
        let json = r#"{"fileTemplates": {"Python": {"bad name.py": {"content": ""}}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bad name.py"));
    }

    #[test]
    fn test_config_validation_unknown_template_language() {
        let json = r#"{"fileTemplates": {"Rust": {}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"usageId": "x", "somethingElse": 1}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.usage_id, "x");
    }
}
