//! In-memory model of a learner's multi-file project.
//!
//! [`ProjectState`] owns the files, the active file and the set of files with
//! unsaved editor content. It maintains one invariant at all times: the
//! current file, when set, is a key of the file map.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::FileTemplate;
use crate::error::{Result, WidgetError};
use crate::language::{FileType, Language};

/// Entry points and manifests that cannot be deleted.
pub const PROTECTED_FILES: [&str; 5] = [
    "main.py",
    "Main.java",
    "main.cpp",
    "index.html",
    "package.json",
];

/// Maximum filename length in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

static FILE_NAME_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/\-]{1,255}$").ok());

/// Returns `true` if `name` is an acceptable project filename.
///
/// # Examples
///
/// ```
/// use codelab_widget::project::is_valid_file_name;
///
/// assert!(is_valid_file_name("src/utils.py"));
/// assert!(!is_valid_file_name("my file.py"));
/// assert!(!is_valid_file_name(""));
/// ```
#[must_use]
pub fn is_valid_file_name(name: &str) -> bool {
    name.len() <= MAX_FILE_NAME_LEN
        && FILE_NAME_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(name))
}

/// Returns `true` if `name` is one of the [`PROTECTED_FILES`].
#[must_use]
pub fn is_protected(name: &str) -> bool {
    PROTECTED_FILES.contains(&name)
}

fn validate_name(name: &str) -> Result<()> {
    if is_valid_file_name(name) {
        Ok(())
    } else {
        Err(WidgetError::invalid_file_name(name))
    }
}

// ============================================================================
// FileRecord
// ============================================================================

/// One file of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File content.
    #[serde(default)]
    pub content: String,

    /// Type tag controlling icon and editor syntax mode.
    #[serde(rename = "type", default)]
    pub file_type: FileType,

    /// When the file was created.
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp::deserialize")]
    pub created_at: DateTime<Utc>,

    /// When the content was last committed.
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp::deserialize")]
    pub modified_at: DateTime<Utc>,
}

impl FileRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(content: impl Into<String>, file_type: FileType) -> Self {
        let now = Utc::now();
        Self {
            content: content.into(),
            file_type,
            created_at: now,
            modified_at: now,
        }
    }

    /// Creates a record whose type is inferred from `name`.
    #[must_use]
    pub fn for_name(name: &str, content: impl Into<String>) -> Self {
        Self::new(content, FileType::from_filename(name))
    }
}

/// Accepts RFC 3339 timestamps and the naive ISO form some hosts emit.
mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ============================================================================
// ProjectState
// ============================================================================

/// The learner's project: files, active file and dirty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    files: BTreeMap<String, FileRecord>,
    current_file: Option<String>,
    dirty_files: BTreeSet<String>,
    multi_file_enabled: bool,
}

impl ProjectState {
    /// Creates an empty project.
    #[must_use]
    pub const fn new(multi_file_enabled: bool) -> Self {
        Self {
            files: BTreeMap::new(),
            current_file: None,
            dirty_files: BTreeSet::new(),
            multi_file_enabled,
        }
    }

    /// Creates a project from existing files and selects the first one.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::InvalidFileName` if any name is rejected.
    pub fn with_files(
        multi_file_enabled: bool,
        files: BTreeMap<String, FileRecord>,
    ) -> Result<Self> {
        for name in files.keys() {
            validate_name(name)?;
        }
        let current_file = files.keys().next().cloned();
        Ok(Self {
            files,
            current_file,
            dirty_files: BTreeSet::new(),
            multi_file_enabled,
        })
    }

    /// Instantiates starter templates, sorted by name, and selects the first.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::InvalidFileName` if a template name is rejected.
    pub fn from_templates(
        multi_file_enabled: bool,
        templates: &BTreeMap<String, FileTemplate>,
    ) -> Result<Self> {
        let files = templates
            .iter()
            .map(|(name, template)| {
                let file_type = template
                    .file_type
                    .unwrap_or_else(|| FileType::from_filename(name));
                (name.clone(), FileRecord::new(template.content.clone(), file_type))
            })
            .collect();
        Self::with_files(multi_file_enabled, files)
    }

    /// Creates a project holding only the language's entry file.
    #[must_use]
    pub fn with_main_file(multi_file_enabled: bool, language: Language) -> Self {
        let name = language.main_file().to_string();
        let mut files = BTreeMap::new();
        files.insert(
            name.clone(),
            FileRecord::new(language.starter_content(), language.file_type()),
        );
        Self {
            files,
            current_file: Some(name),
            dirty_files: BTreeSet::new(),
            multi_file_enabled,
        }
    }

    /// Whether the project was initialized in multi-file mode.
    #[must_use]
    pub const fn is_multi_file(&self) -> bool {
        self.multi_file_enabled
    }

    /// All files, ordered by name.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    /// Looks up a file by name.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileRecord> {
        self.files.get(name)
    }

    /// Returns `true` if the project has a file with this exact name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the project has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Name of the active file.
    #[must_use]
    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    /// Names of files with unsaved editor content.
    #[must_use]
    pub const fn dirty_files(&self) -> &BTreeSet<String> {
        &self.dirty_files
    }

    /// Returns `true` if the named file has unsaved editor content.
    #[must_use]
    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty_files.contains(name)
    }

    /// Adds a new file. The current file is left unchanged unless the
    /// project was empty.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::InvalidFileName` for a rejected name and
    /// `WidgetError::DuplicateFile` if the name is taken.
    pub fn add_file(&mut self, name: &str, record: FileRecord) -> Result<()> {
        validate_name(name)?;
        if self.files.contains_key(name) {
            return Err(WidgetError::duplicate_file(name));
        }
        self.files.insert(name.to_string(), record);
        if self.current_file.is_none() {
            self.current_file = Some(name.to_string());
        }
        Ok(())
    }

    /// Removes a file and returns its record.
    ///
    /// If it was the current file, the lexicographically smallest remaining
    /// name becomes current, or none if the project is now empty.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::FileNotFound` if the name is absent.
    pub fn delete_file(&mut self, name: &str) -> Result<FileRecord> {
        let record = self
            .files
            .remove(name)
            .ok_or_else(|| WidgetError::file_not_found(name))?;
        self.dirty_files.remove(name);
        if self.current_file.as_deref() == Some(name) {
            self.current_file = self.files.keys().next().cloned();
        }
        Ok(record)
    }

    /// Moves a file to a new name, keeping content, dirty flag and
    /// current-file identity.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::FileNotFound`, `WidgetError::DuplicateFile` or
    /// `WidgetError::InvalidFileName`.
    pub fn rename_file(&mut self, old: &str, new: &str) -> Result<()> {
        if !self.files.contains_key(old) {
            return Err(WidgetError::file_not_found(old));
        }
        validate_name(new)?;
        if self.files.contains_key(new) {
            return Err(WidgetError::duplicate_file(new));
        }
        if let Some(record) = self.files.remove(old) {
            self.files.insert(new.to_string(), record);
        }
        if self.dirty_files.remove(old) {
            self.dirty_files.insert(new.to_string());
        }
        if self.current_file.as_deref() == Some(old) {
            self.current_file = Some(new.to_string());
        }
        Ok(())
    }

    /// Makes the named file current.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::FileNotFound` if the name is absent.
    pub fn set_current_file(&mut self, name: &str) -> Result<()> {
        if !self.files.contains_key(name) {
            return Err(WidgetError::file_not_found(name));
        }
        self.current_file = Some(name.to_string());
        Ok(())
    }

    /// Marks a file dirty. Returns `false` if the file does not exist.
    pub fn mark_dirty(&mut self, name: &str) -> bool {
        if !self.files.contains_key(name) {
            return false;
        }
        self.dirty_files.insert(name.to_string());
        true
    }

    /// Clears a file's dirty flag. Returns `true` if it was set.
    pub fn clear_dirty(&mut self, name: &str) -> bool {
        self.dirty_files.remove(name)
    }

    /// Commits new content and bumps `modified_at`.
    ///
    /// # Errors
    ///
    /// Returns `WidgetError::FileNotFound` if the name is absent.
    pub fn update_content(&mut self, name: &str, content: impl Into<String>) -> Result<()> {
        let record = self
            .files
            .get_mut(name)
            .ok_or_else(|| WidgetError::file_not_found(name))?;
        record.content = content.into();
        record.modified_at = Utc::now();
        Ok(())
    }

    /// Immutable copy of every file's content, for handing to a submission.
    #[must_use]
    pub fn snapshot_for_submission(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            files: self
                .files
                .iter()
                .map(|(name, record)| (name.clone(), record.content.clone()))
                .collect(),
            current_file: self.current_file.clone(),
            multi_file: self.multi_file_enabled,
        }
    }

    /// Summary of the project for the file tree header.
    #[must_use]
    pub fn structure(&self) -> ProjectStructure {
        ProjectStructure {
            total_files: self.files.len(),
            languages: self
                .files
                .values()
                .map(|record| record.file_type.editor_language().to_string())
                .collect(),
            file_types: self
                .files
                .values()
                .map(|record| record.file_type)
                .collect(),
            last_modified: self.files.values().map(|record| record.modified_at).max(),
        }
    }
}

// ============================================================================
// ProjectSnapshot
// ============================================================================

/// Read-only copy of a project's contents taken at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSnapshot {
    files: BTreeMap<String, String>,
    current_file: Option<String>,
    multi_file: bool,
}

impl ProjectSnapshot {
    /// Content by filename.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    /// Whether the snapshot came from a multi-file project.
    #[must_use]
    pub const fn is_multi_file(&self) -> bool {
        self.multi_file
    }

    /// Returns `true` if there is no code to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        if self.multi_file {
            self.files.is_empty()
        } else {
            self.current_content().map_or(true, str::is_empty)
        }
    }

    /// Content of the active file.
    #[must_use]
    pub fn current_content(&self) -> Option<&str> {
        self.current_file
            .as_deref()
            .and_then(|name| self.files.get(name))
            .map(String::as_str)
    }

    /// Code that runs for this project: the entry file if present, else the
    /// active file.
    #[must_use]
    pub fn entry_code(&self, language: Language) -> String {
        self.files
            .get(language.main_file())
            .map(String::as_str)
            .or_else(|| self.current_content())
            .unwrap_or_default()
            .to_string()
    }

    /// Code handed to the feedback service.
    ///
    /// Single-file projects send the active file. Multi-file projects send
    /// the entry file, or every file concatenated under `// File:` headers.
    #[must_use]
    pub fn feedback_code(&self, language: Language) -> String {
        if !self.multi_file {
            return self.current_content().unwrap_or_default().to_string();
        }
        if let Some(main) = self.files.get(language.main_file()) {
            return main.clone();
        }
        self.files
            .iter()
            .map(|(name, content)| format!("// File: {name}\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ============================================================================
// ProjectStructure
// ============================================================================

/// Aggregate view of a project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectStructure {
    /// Number of files.
    #[serde(default)]
    pub total_files: usize,
    /// Distinct editor languages present.
    #[serde(default)]
    pub languages: BTreeSet<String>,
    /// Distinct file types present.
    #[serde(default)]
    pub file_types: BTreeSet<FileType>,
    /// Most recent content commit.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp::deserialize_option"
    )]
    pub last_modified: Option<DateTime<Utc>>,
}
