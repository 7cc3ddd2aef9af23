pub mod fingerprint;
pub mod types;

pub use types::{ScanOutcome, TodoMarker};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ScannerConfig;
use crate::syntax::{CommentSyntax, SyntaxTable};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Malformed marker at {path}:{line}: {reason}")]
    MalformedMarker {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid scanner pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("No marker keywords configured")]
    NoKeywords,
}

/// A comment fragment of one source line.
#[derive(Debug)]
struct Segment<'a> {
    text: &'a str,
    /// Nothing but whitespace precedes the comment on this line
    standalone: bool,
}

enum Opener {
    Line,
    Block(usize),
}

/// Table-driven TODO scanner.
///
/// Holds the compiled keyword and issue-reference patterns so one scanner
/// can be shared by every file of a run.
#[derive(Debug, Clone)]
pub struct Scanner {
    keyword: Regex,
    trailing_ref: Regex,
    issue_ref: Regex,
    fold_case: bool,
    collect_body: bool,
}

impl Scanner {
    pub fn new(config: &ScannerConfig) -> Result<Self, ScanError> {
        let keywords: Vec<String> = config
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if keywords.is_empty() {
            return Err(ScanError::NoKeywords);
        }
        let flags = if config.case_sensitive { "" } else { "(?i)" };
        let keyword = Regex::new(&format!(r"{flags}\b(?:{})\b", keywords.join("|")))?;
        let issue_ref = Regex::new(&config.issue_ref_pattern)?;
        let trailing_ref = Regex::new(&format!(
            r"(?:^|\s)(?P<issue_ref>{})\s*$",
            config.issue_ref_pattern
        ))?;

        Ok(Self {
            keyword,
            trailing_ref,
            issue_ref,
            fold_case: config.case_insensitive_fingerprint,
            collect_body: config.collect_body,
        })
    }

    /// Pattern recognizing a bare issue reference.
    pub fn issue_ref_pattern(&self) -> &Regex {
        &self.issue_ref
    }

    /// Scan a file's content for TODO markers.
    ///
    /// Returns `UnsupportedFileType` when the table has no syntax for the path;
    /// callers treat that as an empty result. Malformed markers are skipped and
    /// reported in the outcome's warnings.
    pub fn scan(
        &self,
        path: &str,
        content: &str,
        table: &SyntaxTable,
    ) -> Result<ScanOutcome, ScanError> {
        let language = table
            .lookup(path)
            .ok_or_else(|| ScanError::UnsupportedFileType(path.to_string()))?;
        let outcome = self.scan_with(path, content, &language.comments);
        debug!(
            path,
            language = %language.name,
            markers = outcome.markers.len(),
            skipped = outcome.warnings.len(),
            "scanned file"
        );
        Ok(outcome)
    }

    /// Scan content with an explicit set of comment descriptors.
    pub fn scan_with(&self, path: &str, content: &str, comments: &[CommentSyntax]) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let mut open_block: Option<usize> = None;
        // marker still accepting continuation lines
        let mut open_marker: Option<usize> = None;

        for (idx, line) in content.lines().enumerate() {
            let line_number = idx + 1;
            let segments = comment_segments(line, comments, &mut open_block);

            let hit = segments
                .iter()
                .find_map(|seg| self.parse_segment(seg.text).map(|parsed| (seg.standalone, parsed)));

            match hit {
                Some((standalone, Ok(parsed))) => {
                    outcome.markers.push(TodoMarker {
                        file_path: path.to_string(),
                        line_number,
                        keyword: parsed.keyword.to_string(),
                        author_hint: parsed.author.map(str::to_string),
                        text: parsed.text.to_string(),
                        body: Vec::new(),
                        issue_ref: parsed.issue_ref.map(str::to_string),
                        fingerprint: String::new(),
                    });
                    open_marker = (self.collect_body && standalone).then(|| outcome.markers.len() - 1);
                }
                Some((_, Err(reason))) => {
                    warn!(path, line = line_number, reason, "skipping malformed TODO");
                    outcome.warnings.push(ScanError::MalformedMarker {
                        path: path.to_string(),
                        line: line_number,
                        reason: reason.to_string(),
                    });
                    open_marker = None;
                }
                None => {
                    let continuation = match segments.as_slice() {
                        [only] if only.standalone => Some(only.text.trim()),
                        _ => None,
                    };
                    match (open_marker, continuation) {
                        (Some(marker_idx), Some(text)) if !text.is_empty() => {
                            outcome.markers[marker_idx].body.push(text.to_string());
                        }
                        _ => open_marker = None,
                    }
                }
            }
        }

        fingerprint::assign_fingerprints(&mut outcome.markers, self.fold_case);
        outcome
    }

    /// Split a comment fragment into marker parts.
    ///
    /// `None` when the fragment has no keyword, `Err` with a reason when it
    /// has one but cannot be used.
    fn parse_segment<'a>(&self, segment: &'a str) -> Option<Result<ParsedMarker<'a>, &'static str>> {
        let found = self.keyword.find(segment)?;
        let mut rest = &segment[found.end()..];
        let mut author = None;

        if let Some(after_paren) = rest.strip_prefix('(') {
            let Some(close) = after_paren.find(')') else {
                return Some(Err("unterminated author hint"));
            };
            let name = after_paren[..close].trim().trim_start_matches('@');
            if !name.is_empty() {
                author = Some(name);
            }
            rest = &after_paren[close + 1..];
        }

        let rest = rest.trim_start();
        let rest = rest.strip_prefix(':').unwrap_or(rest).trim();

        let (text, issue_ref) = match self.trailing_ref.captures(rest).and_then(|c| c.name("issue_ref")) {
            Some(m) => (rest[..m.start()].trim_end(), Some(m.as_str())),
            None => (rest, None),
        };

        if text.is_empty() {
            return Some(Err("empty TODO text"));
        }

        Some(Ok(ParsedMarker {
            keyword: found.as_str(),
            author,
            text,
            issue_ref,
        }))
    }
}

#[derive(Debug)]
struct ParsedMarker<'a> {
    keyword: &'a str,
    author: Option<&'a str>,
    text: &'a str,
    issue_ref: Option<&'a str>,
}

/// Extract the comment fragments of a line, tracking block state across lines.
fn comment_segments<'a>(
    line: &'a str,
    comments: &[CommentSyntax],
    open_block: &mut Option<usize>,
) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut pos = 0;
    let mut standalone = open_block.is_some();

    loop {
        if let Some(block_idx) = *open_block {
            let Some((_, end)) = comments.get(block_idx).and_then(CommentSyntax::block_delimiters)
            else {
                *open_block = None;
                continue;
            };
            match line[pos..].find(end) {
                Some(rel) => {
                    segments.push(Segment {
                        text: clean_block_text(&line[pos..pos + rel]),
                        standalone,
                    });
                    pos += rel + end.len();
                    *open_block = None;
                }
                None => {
                    segments.push(Segment {
                        text: clean_block_text(&line[pos..]),
                        standalone,
                    });
                    break;
                }
            }
            continue;
        }

        // earliest opener wins, the longer token on a tie ("#[[" over "#")
        let mut best: Option<(usize, usize, Opener)> = None;
        let mut consider = |at: usize, len: usize, opener: Opener| {
            let better = match &best {
                None => true,
                Some((best_at, best_len, _)) => at < *best_at || (at == *best_at && len > *best_len),
            };
            if better {
                best = Some((at, len, opener));
            }
        };
        for (i, syntax) in comments.iter().enumerate() {
            if let Some(prefix) = syntax.line_prefix.as_deref().filter(|p| !p.is_empty()) {
                if let Some(rel) = line[pos..].find(prefix) {
                    consider(pos + rel, prefix.len(), Opener::Line);
                }
            }
            if let Some((start, _)) = syntax.block_delimiters() {
                if let Some(rel) = line[pos..].find(start) {
                    consider(pos + rel, start.len(), Opener::Block(i));
                }
            }
        }

        match best {
            None => break,
            Some((at, len, Opener::Line)) => {
                segments.push(Segment {
                    text: &line[at + len..],
                    standalone: line[..at].trim().is_empty(),
                });
                break;
            }
            Some((at, len, Opener::Block(i))) => {
                standalone = line[..at].trim().is_empty();
                pos = at + len;
                *open_block = Some(i);
            }
        }
    }

    segments
}

/// Drop the decorative leading `*` of block comment lines.
fn clean_block_text(text: &str) -> &str {
    text.trim_start().trim_start_matches('*')
}
