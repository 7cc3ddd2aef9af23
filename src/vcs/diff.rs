use super::types::{ChangedFile, FileStatus};
use super::VcsError;

/// Parse `git diff` output into the files it touches.
///
/// Each file section starts with:
///   diff --git a/{old} b/{new}
///
/// New files have `--- /dev/null`, deleted files `+++ /dev/null`, renames
/// `rename from` / `rename to`, binary files a `Binary files ... differ` line.
///
/// Hunks start with: @@ -{old_start},{old_count} +{new_start},{new_count} @@
/// and are consumed by their line counts, so content lines that look like
/// headers are never mistaken for them.
pub fn parse_diff(raw_diff: &str) -> Result<Vec<ChangedFile>, VcsError> {
    if raw_diff.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut current: Option<ChangedFile> = None;
    // lines still expected in the current hunk (old side, new side)
    let mut remaining = (0usize, 0usize);

    for line in raw_diff.lines() {
        if remaining != (0, 0) {
            if let Some(file) = current.as_mut() {
                match line.as_bytes().first() {
                    Some(b'+') => {
                        file.additions += 1;
                        remaining.1 = remaining.1.saturating_sub(1);
                    }
                    Some(b'-') => {
                        file.deletions += 1;
                        remaining.0 = remaining.0.saturating_sub(1);
                    }
                    Some(b'\\') => {}
                    _ => {
                        remaining.0 = remaining.0.saturating_sub(1);
                        remaining.1 = remaining.1.saturating_sub(1);
                    }
                }
                continue;
            }
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            files.extend(current.take());
            let (old_path, new_path) = split_header_paths(rest)
                .ok_or_else(|| VcsError::DiffParse(format!("Invalid diff header: {line}")))?;
            let mut file = ChangedFile::new(&new_path, FileStatus::Modified);
            if old_path != new_path {
                file.old_path = Some(old_path);
            }
            current = Some(file);
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("@@") {
            let (_, old_count, _, new_count) = parse_hunk_header(line)?;
            remaining = (old_count, new_count);
        } else if line.starts_with("new file mode") {
            file.status = FileStatus::Added;
        } else if line.starts_with("deleted file mode") {
            file.status = FileStatus::Deleted;
        } else if let Some(from) = line.strip_prefix("rename from ") {
            file.old_path = Some(unquote(from));
            file.status = FileStatus::Renamed;
        } else if let Some(to) = line.strip_prefix("rename to ") {
            file.path = unquote(to);
            file.status = FileStatus::Renamed;
        } else if line.starts_with("Binary files ") || line == "GIT binary patch" {
            file.is_binary = true;
        } else if let Some(path) = line.strip_prefix("--- ") {
            if path.trim() == "/dev/null" {
                file.status = FileStatus::Added;
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if path.trim() == "/dev/null" {
                file.status = FileStatus::Deleted;
            }
        }
    }

    files.extend(current);
    for file in &mut files {
        if matches!(file.status, FileStatus::Added | FileStatus::Deleted) {
            file.old_path = None;
        }
    }
    Ok(files)
}

/// Split `a/{old} b/{new}` into both paths.
fn split_header_paths(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    if let Some(quoted) = rest.strip_prefix('"') {
        // "a/x y" "b/x y"
        let (old, new) = quoted.split_once("\" \"")?;
        let new = new.strip_suffix('"')?;
        return Some((
            old.strip_prefix("a/")?.to_string(),
            new.strip_prefix("b/")?.to_string(),
        ));
    }
    let rest = rest.strip_prefix("a/")?;
    // same path on both sides is the common case and may contain " b/"
    let half = rest.len().checked_sub(3)? / 2;
    if rest.len() % 2 == 1 {
        if let (Some(old), Some(" b/"), Some(new)) =
            (rest.get(..half), rest.get(half..half + 3), rest.get(half + 3..))
        {
            if old == new {
                return Some((old.to_string(), new.to_string()));
            }
        }
    }
    let (old, new) = rest.split_once(" b/")?;
    Some((old.to_string(), new.to_string()))
}

fn unquote(path: &str) -> String {
    let path = path.trim();
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), VcsError> {
    let header = line
        .trim()
        .strip_prefix("@@")
        .ok_or_else(|| VcsError::DiffParse("Invalid hunk header".to_string()))?
        .trim();
    let header = header.split("@@").next().unwrap_or(header).trim();
    let mut parts = header.split_whitespace();
    let old_part = parts
        .next()
        .ok_or_else(|| VcsError::DiffParse("Missing old range".to_string()))?;
    let new_part = parts
        .next()
        .ok_or_else(|| VcsError::DiffParse("Missing new range".to_string()))?;

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (new_start, new_count) = parse_range(new_part, '+')?;

    Ok((old_start, old_count, new_start, new_count))
}

fn parse_range(part: &str, prefix: char) -> Result<(usize, usize), VcsError> {
    let range = part
        .strip_prefix(prefix)
        .ok_or_else(|| VcsError::DiffParse("Invalid range prefix".to_string()))?;
    let (start_str, count_str) = match range.split_once(',') {
        Some((start, count)) => (start, count),
        None => (range, "1"),
    };
    let start = start_str
        .parse::<usize>()
        .map_err(|_| VcsError::DiffParse(format!("Invalid range start in {}", part)))?;
    let count = count_str
        .parse::<usize>()
        .map_err(|_| VcsError::DiffParse(format!("Invalid range count in {}", part)))?;
    Ok((start, count))
}
