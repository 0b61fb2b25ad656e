//! Locales which can be configured, from glibc's `SUPPORTED` list or
//! `locale -a`.

use cap_std_ext::cap_std::fs::Dir;
use vistula_utils::{Cmd, Executor};

use super::{read_lossy, sorted_casefold};

/// glibc's list of supported locales, relative to the root.
const SUPPORTED: &str = "usr/share/i18n/SUPPORTED";

/// Parse glibc's `SUPPORTED` file, whose lines look like
/// `en_US.UTF-8 UTF-8`; only the locale name is kept.
pub fn parse_supported_locales(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .map(ToOwned::to_owned)
        .collect()
}

/// Keep UTF-8 locales (if requested), deduplicated and sorted.
pub fn filter_locales(candidates: impl IntoIterator<Item = String>, utf8_only: bool) -> Vec<String> {
    sorted_casefold(
        candidates
            .into_iter()
            .filter(|l| !utf8_only || l.contains("UTF-8") || l.contains("utf8")),
    )
}

/// Locales offered by the environment rooted at `root`; uses the glibc list
/// if present, otherwise `locale -a`. Failures yield an empty list.
pub fn list_locales<E: Executor + ?Sized>(root: &Dir, exec: &E, utf8_only: bool) -> Vec<String> {
    let mut candidates = read_lossy(root, SUPPORTED)
        .map(|s| parse_supported_locales(&s))
        .unwrap_or_default();
    if candidates.is_empty() {
        let cmd = Cmd::new("locale").arg("-a").allow_in_dry_run().unchecked();
        match exec.run(cmd) {
            Ok(o) if o.success() => {
                candidates = o
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            }
            Ok(o) => tracing::debug!("locale -a exited with {}", o.code),
            Err(e) => tracing::debug!("locale -a: {e:#}"),
        }
    }
    filter_locales(candidates, utf8_only)
}
