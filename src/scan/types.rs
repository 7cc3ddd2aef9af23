/// One TODO comment found in a file at a given revision.
///
/// Markers are recomputed on every scan; only the fingerprint carries
/// identity across revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoMarker {
    /// Repository-relative path
    pub file_path: String,
    /// 1-based line number in the scanned revision
    pub line_number: usize,
    /// Keyword exactly as written in the line (e.g. "TODO")
    pub keyword: String,
    /// Author from `TODO(username)`, if any
    pub author_hint: Option<String>,
    /// Description after the keyword, without author hint or issue reference
    pub text: String,
    /// Comment lines directly following the marker
    pub body: Vec<String>,
    /// Issue reference already embedded at the end of the comment
    pub issue_ref: Option<String>,
    /// Stable identity derived from the path and normalized text
    pub fingerprint: String,
}

impl TodoMarker {
    /// Text and body as one string, the part an issue is built from.
    pub fn description(&self) -> String {
        if self.body.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n{}", self.text, self.body.join("\n"))
        }
    }

    /// `path:line`, used in logs and issue bodies.
    pub fn location(&self) -> String {
        format!("{}:{}", self.file_path, self.line_number)
    }
}

/// Markers found in one file plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub markers: Vec<TodoMarker>,
    pub warnings: Vec<super::ScanError>,
}
