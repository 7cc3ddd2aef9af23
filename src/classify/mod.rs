use std::collections::{BTreeMap, HashMap, HashSet};

use crate::scan::fingerprint::{normalize_text, rekey};
use crate::scan::TodoMarker;

/// The same TODO as seen in both revisions.
#[derive(Debug, Clone)]
pub struct MarkerPair {
    pub before: TodoMarker,
    pub after: TodoMarker,
}

/// TODOs of a revision pair, split into four disjoint sets by fingerprint.
#[derive(Debug, Default)]
pub struct Classification {
    pub added: BTreeMap<String, TodoMarker>,
    pub removed: BTreeMap<String, TodoMarker>,
    pub unchanged: BTreeMap<String, MarkerPair>,
    pub modified: BTreeMap<String, MarkerPair>,
}

impl Classification {
    /// Fold another file's classification into this one.
    pub fn merge(&mut self, other: Classification) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.unchanged.extend(other.unchanged);
        self.modified.extend(other.modified);
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.unchanged.is_empty()
            && self.modified.is_empty()
    }

    /// Markers present in the target revision.
    pub fn after_markers(&self) -> impl Iterator<Item = &TodoMarker> {
        self.added
            .values()
            .chain(self.unchanged.values().map(|p| &p.after))
            .chain(self.modified.values().map(|p| &p.after))
    }

    fn insert_pair(&mut self, before: TodoMarker, after: TodoMarker, normalize_whitespace: bool) {
        let fp = before.fingerprint.clone();
        let pair = MarkerPair { before, after };
        if same_description(&pair.before, &pair.after, normalize_whitespace) {
            self.unchanged.insert(fp, pair);
        } else {
            self.modified.insert(fp, pair);
        }
    }
}

/// Classify the TODOs of one file between two revisions.
///
/// Either side may be empty (added or deleted file). Markers linking the
/// same issue on both sides are paired first and keep the earlier
/// fingerprint; the rest pair up by fingerprint. An added marker whose
/// fingerprint is still owned by an earlier TODO is rekeyed. A pair is
/// *unchanged* when the descriptions match and *modified* otherwise;
/// `normalize_whitespace` makes whitespace-only edits count as unchanged.
pub fn classify(
    before: &[TodoMarker],
    after: &[TodoMarker],
    normalize_whitespace: bool,
) -> Classification {
    let mut result = Classification::default();
    let mut paired = vec![false; before.len()];
    let mut unpaired_after = Vec::new();

    let mut before_by_ref: HashMap<&str, usize> = HashMap::new();
    for (idx, marker) in before.iter().enumerate() {
        if let Some(issue_ref) = marker.issue_ref.as_deref() {
            before_by_ref.entry(issue_ref).or_insert(idx);
        }
    }
    for marker in after {
        let linked = marker
            .issue_ref
            .as_deref()
            .and_then(|issue_ref| before_by_ref.remove(issue_ref));
        match linked {
            Some(idx) => {
                paired[idx] = true;
                let old = &before[idx];
                let mut current = marker.clone();
                current.fingerprint = old.fingerprint.clone();
                result.insert_pair(old.clone(), current, normalize_whitespace);
            }
            None => unpaired_after.push(marker),
        }
    }

    let mut before_by_fp: HashMap<&str, usize> = before
        .iter()
        .enumerate()
        .filter(|(idx, _)| !paired[*idx])
        .map(|(idx, m)| (m.fingerprint.as_str(), idx))
        .collect();
    let mut added = Vec::new();
    for marker in unpaired_after {
        match before_by_fp.remove(marker.fingerprint.as_str()) {
            Some(idx) => {
                paired[idx] = true;
                result.insert_pair(before[idx].clone(), marker.clone(), normalize_whitespace);
            }
            None => added.push(marker.clone()),
        }
    }

    let taken: HashSet<String> = before.iter().map(|m| m.fingerprint.clone()).collect();
    for mut marker in added {
        let original = marker.fingerprint.clone();
        let mut attempt = 0;
        while taken.contains(&marker.fingerprint) || result.added.contains_key(&marker.fingerprint) {
            attempt += 1;
            marker.fingerprint = rekey(&original, attempt);
        }
        result.added.insert(marker.fingerprint.clone(), marker);
    }

    for (idx, marker) in before.iter().enumerate() {
        if !paired[idx] {
            result.removed.insert(marker.fingerprint.clone(), marker.clone());
        }
    }

    result
}

fn same_description(a: &TodoMarker, b: &TodoMarker, normalize_whitespace: bool) -> bool {
    if normalize_whitespace {
        normalize_text(&a.description(), false) == normalize_text(&b.description(), false)
    } else {
        a.description() == b.description()
    }
}
