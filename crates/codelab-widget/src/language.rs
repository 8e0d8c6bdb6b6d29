//! Exercise languages and per-file type tags.
//!
//! A [`Language`] describes the exercise as a whole: which sandbox language
//! id it runs under, which editor mode it uses, and which file acts as the
//! entry point. A [`FileType`] tags a single project file and is derived
//! from its extension.

use serde::{Deserialize, Serialize};

// ============================================================================
// Language
// ============================================================================

/// Language of a code-lab exercise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Language {
    /// Python 3 (default).
    #[default]
    Python,
    /// JavaScript on Node.js.
    JavaScript,
    /// Java.
    Java,
    /// C++.
    Cpp,
    /// HTML and CSS, rendered in a preview instead of executed.
    HtmlCss,
}

impl Language {
    /// All supported languages, in display order.
    pub const ALL: [Self; 5] = [
        Self::Python,
        Self::JavaScript,
        Self::Java,
        Self::Cpp,
        Self::HtmlCss,
    ];

    /// Human-readable label, matching the labels used by the host.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::Java => "Java",
            Self::Cpp => "C++",
            Self::HtmlCss => "HTML/CSS",
        }
    }

    /// Editor syntax mode for the exercise.
    #[must_use]
    pub const fn editor_id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::HtmlCss => "html",
        }
    }

    /// Sandbox language id, or `None` for markup exercises that never execute.
    #[must_use]
    pub const fn sandbox_id(self) -> Option<u32> {
        match self {
            Self::Python => Some(92),
            Self::JavaScript => Some(93),
            Self::Java => Some(91),
            Self::Cpp => Some(54),
            Self::HtmlCss => None,
        }
    }

    /// Entry-point file of a project in this language.
    #[must_use]
    pub const fn main_file(self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::JavaScript => "index.js",
            Self::Java => "Main.java",
            Self::Cpp => "main.cpp",
            Self::HtmlCss => "index.html",
        }
    }

    /// File type of the entry-point file.
    #[must_use]
    pub const fn file_type(self) -> FileType {
        match self {
            Self::Python => FileType::Python,
            Self::JavaScript => FileType::JavaScript,
            Self::Java => FileType::Java,
            Self::Cpp => FileType::Cpp,
            Self::HtmlCss => FileType::Html,
        }
    }

    /// Returns `true` for the markup/style category, which is previewed
    /// rather than sent to the sandbox.
    #[must_use]
    pub const fn is_markup(self) -> bool {
        matches!(self, Self::HtmlCss)
    }

    /// Content placed in a fresh single-file project.
    #[must_use]
    pub const fn starter_content(self) -> &'static str {
        match self {
            Self::HtmlCss => "<!-- Write your HTML here. Add CSS in a <style> tag. -->\n",
            _ => "",
        }
    }

    /// Parses a label or editor id, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "javascript" | "js" => Some(Self::JavaScript),
            "java" => Some(Self::Java),
            "c++" | "cpp" => Some(Self::Cpp),
            "html/css" | "html" | "htmlcss" => Some(Self::HtmlCss),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid language '{s}': expected one of 'Python', 'JavaScript', 'Java', 'C++', 'HTML/CSS'"
            ))
        })
    }
}

impl Serialize for Language {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.label())
    }
}

// ============================================================================
// FileType
// ============================================================================

/// Type tag of a single project file.
///
/// Unknown tags coming from the host deserialize as [`FileType::Text`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Python source.
    Python,
    /// JavaScript source.
    JavaScript,
    /// Java source.
    Java,
    /// C++ source.
    Cpp,
    /// C source.
    C,
    /// HTML document.
    Html,
    /// CSS stylesheet.
    Css,
    /// JSON document.
    Json,
    /// Markdown document.
    Markdown,
    /// Anything else.
    #[default]
    #[serde(other)]
    Text,
}

impl FileType {
    /// Infers the type from a filename's extension.
    ///
    /// # Examples
    ///
    /// ```
    /// use codelab_widget::FileType;
    ///
    /// assert_eq!(FileType::from_filename("src/app.js"), FileType::JavaScript);
    /// assert_eq!(FileType::from_filename("README"), FileType::Text);
    /// ```
    #[must_use]
    pub fn from_filename(name: &str) -> Self {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return Self::Text;
        };
        match ext.to_lowercase().as_str() {
            "py" => Self::Python,
            "js" => Self::JavaScript,
            "java" => Self::Java,
            "cpp" | "cc" | "hpp" => Self::Cpp,
            "c" | "h" => Self::C,
            "html" | "htm" => Self::Html,
            "css" => Self::Css,
            "json" => Self::Json,
            "md" => Self::Markdown,
            _ => Self::Text,
        }
    }

    /// Editor syntax mode for files of this type.
    #[must_use]
    pub const fn editor_language(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Html => "html",
            Self::Css => "css",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Text => "plaintext",
        }
    }

    /// CSS class of the file-tree icon.
    #[must_use]
    pub const fn icon_class(self) -> &'static str {
        match self {
            Self::Python => "file-icon-python",
            Self::JavaScript => "file-icon-javascript",
            Self::Java => "file-icon-java",
            Self::Cpp | Self::C => "file-icon-cpp",
            Self::Html => "file-icon-html",
            Self::Css => "file-icon-css",
            Self::Json => "file-icon-json",
            Self::Markdown => "file-icon-markdown",
            Self::Text => "file-icon-default",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Html => "html",
            Self::Css => "css",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Text => "text",
        };
        f.write_str(s)
    }
}
