use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::types::TodoMarker;

/// Collapse runs of whitespace, optionally case-fold.
pub fn normalize_text(text: &str, fold_case: bool) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if fold_case {
        collapsed.to_lowercase()
    } else {
        collapsed
    }
}

/// Fingerprint of a TODO: SHA-256 over the path and normalized text.
///
/// `ordinal` separates repeated identical TODOs within one file; the first
/// occurrence (ordinal 0) hashes path and text only.
pub fn fingerprint(file_path: &str, text: &str, ordinal: usize, fold_case: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_text(text, fold_case).as_bytes());
    if ordinal > 0 {
        hasher.update([0u8]);
        hasher.update(ordinal.to_string().as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Replacement fingerprint for a TODO whose positional one already belongs
/// to another TODO of the same file.
pub fn rekey(fingerprint: &str, attempt: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update([0u8]);
    hasher.update(attempt.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Fill in fingerprints for markers of one file, in line order.
pub fn assign_fingerprints(markers: &mut [TodoMarker], fold_case: bool) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for marker in markers.iter_mut() {
        let key = normalize_text(&marker.text, fold_case);
        let ordinal = seen.entry(key).or_insert(0);
        marker.fingerprint = fingerprint(&marker.file_path, &marker.text, *ordinal, fold_case);
        *ordinal += 1;
    }
}
