use regex::Regex;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::scan::TodoMarker;

/// The line a marker was scanned from no longer holds that marker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stale annotation at {file_path}:{line_number}: line no longer contains \"{expected}\"")]
pub struct StaleAnnotationWarning {
    pub file_path: String,
    pub line_number: usize,
    pub expected: String,
}

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Failed to rewrite {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An issue reference to embed into a marker's line.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub marker: TodoMarker,
    pub issue_ref: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineEdit {
    /// The identical reference is already there
    Unchanged,
    Rewritten(String),
}

/// Result of annotating one file.
#[derive(Debug, Default)]
pub struct FileAnnotation {
    pub content: String,
    pub rewritten: usize,
    pub stale: Vec<StaleAnnotationWarning>,
}

/// Embed `issue_ref` right after the marker text in `line`.
///
/// A different reference already following the text is replaced; the same
/// reference leaves the line untouched. The text may only be followed by
/// whitespace, a reference and one of the block `closers`; anything else
/// means the line was edited since it was scanned and it is left alone.
pub fn annotate_line(
    marker: &TodoMarker,
    line: &str,
    issue_ref: &str,
    ref_pattern: &Regex,
    closers: &[&str],
) -> Result<LineEdit, StaleAnnotationWarning> {
    let stale = || StaleAnnotationWarning {
        file_path: marker.file_path.clone(),
        line_number: marker.line_number,
        expected: marker.text.clone(),
    };

    let keyword_at = line.find(&marker.keyword).ok_or_else(stale)?;
    let after_keyword = keyword_at + marker.keyword.len();

    for (offset, _) in line[after_keyword..].match_indices(&marker.text) {
        let text_end = after_keyword + offset + marker.text.len();
        let tail = &line[text_end..];

        let existing = ref_pattern
            .find(tail)
            .filter(|m| m.start() > 0 && tail[..m.start()].trim().is_empty());
        let rest = existing.map_or(tail, |m| &tail[m.end()..]);
        if !ends_comment(rest, closers) {
            continue;
        }

        let rewritten = match existing {
            Some(m) if m.as_str() == issue_ref => return Ok(LineEdit::Unchanged),
            Some(m) => format!("{}{}{}", &line[..text_end + m.start()], issue_ref, &tail[m.end()..]),
            None => format!("{} {}{}", &line[..text_end], issue_ref, tail),
        };
        return Ok(LineEdit::Rewritten(rewritten));
    }
    Err(stale())
}

/// Blank, or a block closer after optional whitespace.
fn ends_comment(rest: &str, closers: &[&str]) -> bool {
    let rest = rest.trim_start();
    rest.is_empty() || closers.iter().any(|closer| rest.starts_with(closer))
}

/// Apply annotations to a file's content.
///
/// Lines are matched by number; line order and endings are preserved.
pub fn annotate_content(
    content: &str,
    annotations: &[Annotation],
    ref_pattern: &Regex,
    closers: &[&str],
) -> FileAnnotation {
    let mut lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
    let mut result = FileAnnotation::default();

    for annotation in annotations {
        let marker = &annotation.marker;
        let Some(raw) = marker.line_number.checked_sub(1).and_then(|i| lines.get_mut(i)) else {
            warn!(location = %marker.location(), "annotation target line is past end of file");
            result.stale.push(StaleAnnotationWarning {
                file_path: marker.file_path.clone(),
                line_number: marker.line_number,
                expected: marker.text.clone(),
            });
            continue;
        };

        let body_len = raw.trim_end_matches(|c: char| c == '\n' || c == '\r').len();
        let (body, ending) = raw.split_at(body_len);
        match annotate_line(marker, body, &annotation.issue_ref, ref_pattern, closers) {
            Ok(LineEdit::Unchanged) => {
                debug!(location = %marker.location(), "already annotated");
            }
            Ok(LineEdit::Rewritten(line)) => {
                *raw = format!("{line}{ending}");
                result.rewritten += 1;
            }
            Err(stale) => {
                warn!(location = %marker.location(), "skipping stale annotation");
                result.stale.push(stale);
            }
        }
    }

    result.content = lines.concat();
    result
}

/// Annotate a file in the working tree, writing it back only when a line
/// changed.
#[instrument(skip(annotations, ref_pattern, closers), fields(path = %relative_path, count = annotations.len()))]
pub async fn annotate_file(
    repo_root: &Path,
    relative_path: &str,
    annotations: &[Annotation],
    ref_pattern: &Regex,
    closers: &[&str],
) -> Result<FileAnnotation, AnnotateError> {
    let path = repo_root.join(relative_path);
    let io_err = |source| AnnotateError::Io {
        path: relative_path.to_string(),
        source,
    };

    let content = tokio::fs::read_to_string(&path).await.map_err(io_err)?;
    let result = annotate_content(&content, annotations, ref_pattern, closers);
    if result.rewritten > 0 {
        tokio::fs::write(&path, &result.content).await.map_err(io_err)?;
        debug!(rewritten = result.rewritten, "wrote annotations");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::scan::Scanner;
    use crate::syntax::SyntaxTable;

    const REF: &str = "https://tracker/issues/42";
    const CLOSERS: &[&str] = &["-->", "*/"];

    fn scanner() -> Scanner {
        Scanner::new(&ScannerConfig::default()).unwrap()
    }

    fn scan(path: &str, content: &str) -> Vec<TodoMarker> {
        scanner().scan(path, content, &SyntaxTable::builtin()).unwrap().markers
    }

    fn annotate(content: &str, path: &str, issue_ref: &str) -> FileAnnotation {
        let annotations: Vec<Annotation> = scan(path, content)
            .into_iter()
            .map(|marker| Annotation {
                marker,
                issue_ref: issue_ref.to_string(),
            })
            .collect();
        annotate_content(content, &annotations, scanner().issue_ref_pattern(), CLOSERS)
    }

    #[test]
    fn test_appends_reference() {
        let result = annotate("# TODO: fix parser\n", "a.sh", REF);
        assert_eq!(result.content, "# TODO: fix parser https://tracker/issues/42\n");
        assert_eq!(result.rewritten, 1);
    }

    #[test]
    fn test_is_idempotent() {
        let once = annotate("# TODO: fix parser\n", "a.sh", REF);
        let twice = annotate(&once.content, "a.sh", REF);
        assert_eq!(twice.content, once.content);
        assert_eq!(twice.rewritten, 0);
    }

    #[test]
    fn test_scan_annotate_rescan_keeps_text() {
        let annotated = annotate("x=1\n# TODO(bob): fix parser\n", "a.sh", REF);
        let rescanned = scan("a.sh", &annotated.content);
        assert_eq!(rescanned[0].text, "fix parser");
        assert_eq!(rescanned[0].issue_ref.as_deref(), Some(REF));
        assert_eq!(rescanned[0].author_hint.as_deref(), Some("bob"));
    }

    #[test]
    fn test_replaces_different_reference() {
        let result = annotate("# TODO: fix parser https://tracker/issues/7\n", "a.sh", REF);
        assert_eq!(result.content, "# TODO: fix parser https://tracker/issues/42\n");
    }

    #[test]
    fn test_keeps_block_closer_and_other_lines() {
        let content = "<div>\n<!-- TODO: add nav -->\n</div>\n";
        let result = annotate(content, "index.html", REF);
        assert_eq!(
            result.content,
            "<div>\n<!-- TODO: add nav https://tracker/issues/42 -->\n</div>\n"
        );
        let rescanned = scan("index.html", &result.content);
        assert_eq!(rescanned[0].text, "add nav");
        assert_eq!(rescanned[0].issue_ref.as_deref(), Some(REF));
    }

    #[test]
    fn test_preserves_crlf_and_missing_final_newline() {
        let result = annotate("echo\r\n# TODO: a\r\n# TODO: b", "a.sh", REF);
        assert_eq!(
            result.content,
            "echo\r\n# TODO: a https://tracker/issues/42\r\n# TODO: b https://tracker/issues/42"
        );
    }

    #[test]
    fn test_stale_line_is_skipped() {
        let markers = scan("a.sh", "# TODO: fix parser\n");
        let annotation = Annotation {
            marker: markers[0].clone(),
            issue_ref: REF.to_string(),
        };
        let edited = "# TODO: fix the lexer instead\n";
        let result = annotate_content(edited, &[annotation], scanner().issue_ref_pattern(), CLOSERS);
        assert_eq!(result.content, edited);
        assert_eq!(result.rewritten, 0);
        assert_eq!(result.stale.len(), 1);
        assert_eq!(result.stale[0].line_number, 1);
    }

    #[test]
    fn test_words_added_after_text_make_line_stale() {
        let markers = scan("a.sh", "# TODO: fix parser\n");
        let annotation = Annotation {
            marker: markers[0].clone(),
            issue_ref: REF.to_string(),
        };
        let pattern = scanner();
        for edited in [
            "# TODO: fix parser later\n",
            "# TODO: fix parser https://tracker/issues/7 later\n",
            "<!-- TODO: fix parser soon -->\n",
        ] {
            let result = annotate_content(edited, &[annotation.clone()], pattern.issue_ref_pattern(), CLOSERS);
            assert_eq!(result.content, edited);
            assert_eq!(result.rewritten, 0);
            assert_eq!(result.stale.len(), 1);
        }
    }

    #[test]
    fn test_text_may_be_followed_by_closer_and_markup() {
        let content = "<!-- TODO: add nav --> <nav></nav>\n";
        let result = annotate(content, "index.html", REF);
        assert_eq!(
            result.content,
            "<!-- TODO: add nav https://tracker/issues/42 --> <nav></nav>\n"
        );
    }

    #[test]
    fn test_line_past_end_is_stale() {
        let markers = scan("a.sh", "\n\n# TODO: fix parser\n");
        let annotation = Annotation {
            marker: markers[0].clone(),
            issue_ref: REF.to_string(),
        };
        let result = annotate_content("# short\n", &[annotation], scanner().issue_ref_pattern(), CLOSERS);
        assert_eq!(result.stale.len(), 1);
        assert_eq!(result.content, "# short\n");
    }

    #[test]
    fn test_annotate_line_direct() {
        let markers = scan("a.sh", "echo # TODO: tidy\n");
        let marker = &markers[0];
        let pattern = scanner();
        let edit = annotate_line(marker, "echo # TODO: tidy", REF, pattern.issue_ref_pattern(), &[]).unwrap();
        assert_eq!(
            edit,
            LineEdit::Rewritten("echo # TODO: tidy https://tracker/issues/42".to_string())
        );
    }

    #[tokio::test]
    async fn test_annotate_file_writes_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ci")).unwrap();
        let path = dir.path().join("ci/build.sh");
        std::fs::write(&path, "# TODO: cache deps\n").unwrap();

        let markers = scan("ci/build.sh", "# TODO: cache deps\n");
        let annotations = vec![Annotation {
            marker: markers[0].clone(),
            issue_ref: REF.to_string(),
        }];
        let pattern = scanner();

        let first = annotate_file(dir.path(), "ci/build.sh", &annotations, pattern.issue_ref_pattern(), &[])
            .await
            .unwrap();
        assert_eq!(first.rewritten, 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# TODO: cache deps https://tracker/issues/42\n"
        );

        let second = annotate_file(dir.path(), "ci/build.sh", &annotations, pattern.issue_ref_pattern(), &[])
            .await
            .unwrap();
        assert_eq!(second.rewritten, 0);
    }

    #[tokio::test]
    async fn test_annotate_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = scanner();
        let result = annotate_file(dir.path(), "nope.sh", &[], pattern.issue_ref_pattern(), &[]).await;
        assert!(matches!(result, Err(AnnotateError::Io { .. })));
    }
}
