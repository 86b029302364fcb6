//! Helpers for making untrusted names safe to log and to return to callers.
//!
//! Upload filenames and archive entry names come straight from the user.
//! Log lines and warnings get a bounded, printable form instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

const MAX_LABEL_CHARS: usize = 200;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns a short deterministic hash of a path, so log lines about the same
/// spooled upload can be correlated without the path itself.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let hash = hasher.finish();
    format!("{:016x}", hash)
}

/// Printable, length-bounded rendition of an archive entry name.
///
/// Control characters are escaped; names past the limit are cut and marked
/// with a trailing ellipsis.
pub fn entry_label(name: &str) -> String {
    let mut label = String::with_capacity(name.len().min(MAX_LABEL_CHARS));
    for (i, c) in name.chars().enumerate() {
        if i == MAX_LABEL_CHARS {
            label.push('…');
            break;
        }
        if c.is_control() {
            label.extend(c.escape_default());
        } else {
            label.push(c);
        }
    }
    label
}
