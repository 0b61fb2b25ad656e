//! Searching the configured flatpak remotes for applications.

use serde::Serialize;
use vistula_utils::{Cmd, Executor};

use super::split_columns;

/// The default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 25;

/// A sandboxed application found by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxedApp {
    /// Application id, e.g. `org.gimp.GIMP`.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Short description; may be empty.
    pub description: String,
}

fn is_header(line: &str) -> bool {
    line.contains("Application") && line.contains("Description")
}

/// Parse `flatpak search --columns=application,name,description` output.
/// The format varies between flatpak versions, so this is lenient: rows
/// with fewer than two columns or implausible ids are skipped.
pub fn parse_app_search(s: &str, limit: usize) -> Vec<SandboxedApp> {
    s.lines()
        .filter(|l| !l.trim().is_empty() && !is_header(l))
        .filter_map(|l| {
            let mut cols = split_columns(l).into_iter();
            let id = cols.next()?;
            let name = cols.next()?;
            let description = cols.next().unwrap_or_default();
            if id.contains('/') || id.contains(' ') {
                tracing::debug!("Skipping malformed search result: {l}");
                return None;
            }
            Some(SandboxedApp {
                id,
                name,
                description,
            })
        })
        .take(limit)
        .collect()
}

/// Search the configured remotes for applications. An empty query, a missing
/// `flatpak` or a failed search yield no results.
pub fn search_apps<E: Executor + ?Sized>(exec: &E, query: &str, limit: usize) -> Vec<SandboxedApp> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }
    let cmd = Cmd::new("flatpak")
        .args(["search", "--columns=application,name,description", query])
        .allow_in_dry_run()
        .unchecked();
    match exec.run(cmd) {
        Ok(o) if o.success() => parse_app_search(&o.stdout, limit),
        Ok(o) => {
            tracing::info!("flatpak search failed (exit {})", o.code);
            Vec::new()
        }
        Err(e) => {
            tracing::info!("flatpak search failed: {e:#}");
            Vec::new()
        }
    }
}
