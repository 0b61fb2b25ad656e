//! # Environment inventory
//!
//! Best-effort discovery of what the live environment offers: locales,
//! timezones, Wi-Fi networks and installable sandboxed apps. The parsers
//! are pure; the `list_*` functions re-run their commands on every call.

use cap_std_ext::cap_std::fs::Dir;
use once_cell::sync::Lazy;
use regex::Regex;

mod flatpak;
pub use flatpak::*;
mod locales;
pub use locales::*;
mod timezones;
pub use timezones::*;
mod wifi;
pub use wifi::*;

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Split a line of tabular command output into trimmed, non-empty columns.
/// Tabs are preferred; then runs of two or more spaces; then any whitespace.
pub(crate) fn split_columns(line: &str) -> Vec<String> {
    fn nonempty<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
        parts
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
    if line.contains('\t') {
        return nonempty(line.split('\t'));
    }
    let r = nonempty(MULTI_SPACE.split(line));
    if r.len() >= 2 {
        return r;
    }
    nonempty(line.split_whitespace())
}

/// Read a file below `root`, replacing invalid UTF-8. A missing or
/// unreadable file yields `None`.
pub(crate) fn read_lossy(root: &Dir, path: &str) -> Option<String> {
    match root.read(path) {
        Ok(buf) => Some(String::from_utf8_lossy(&buf).into_owned()),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Failed reading {path}: {e}");
            }
            None
        }
    }
}

/// Deduplicate and sort case-insensitively (ties broken by the exact text).
pub(crate) fn sorted_casefold(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut r = items.into_iter().collect::<Vec<_>>();
    r.sort_by_cached_key(|s| (s.to_lowercase(), s.clone()));
    r.dedup();
    r
}
