use serde::{Deserialize, Serialize};

/// One way of writing a comment in a file type.
///
/// A descriptor carries a line prefix, a block delimiter pair, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSyntax {
    /// Starts a comment that runs to the end of the line (e.g. `#`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_prefix: Option<String>,
    /// Opens a block comment (e.g. `<!--`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_start: Option<String>,
    /// Closes a block comment (e.g. `-->`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_end: Option<String>,
}

impl CommentSyntax {
    pub fn line(prefix: &str) -> Self {
        Self {
            line_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    pub fn block(start: &str, end: &str) -> Self {
        Self {
            line_prefix: None,
            block_start: Some(start.to_string()),
            block_end: Some(end.to_string()),
        }
    }

    /// Block delimiters, only when both ends are configured.
    pub fn block_delimiters(&self) -> Option<(&str, &str)> {
        match (self.block_start.as_deref(), self.block_end.as_deref()) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => Some((start, end)),
            _ => None,
        }
    }
}

/// Comment syntax for one family of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSyntax {
    /// Display name (e.g. "Shell")
    pub name: String,
    /// File extensions without the dot, matched case-insensitively
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Exact file names or `*` patterns matched against the file name
    /// (e.g. "Dockerfile", "Dockerfile.*")
    #[serde(default)]
    pub filenames: Vec<String>,
    /// Comment descriptors, tried together on every line
    pub comments: Vec<CommentSyntax>,
}

impl LanguageSyntax {
    /// Tokens closing this language's block comments.
    pub fn block_closers(&self) -> Vec<&str> {
        self.comments
            .iter()
            .filter_map(|c| c.block_delimiters().map(|(_, end)| end))
            .collect()
    }
}

/// Mapping from file name / extension to comment syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxTable {
    pub languages: Vec<LanguageSyntax>,
}
