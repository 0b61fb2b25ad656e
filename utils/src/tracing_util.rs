//! Helpers related to tracing, used by main entrypoints

use std::fs::File;
use std::sync::Mutex;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// The log file is rotated at startup once it grows past this size.
pub const LOG_FILE_MAX_BYTES: u64 = 2_000_000;
/// Number of rotated log files kept next to the current one.
pub const LOG_FILE_BACKUPS: u32 = 3;

/// Logging options, usually taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Log at `debug` level.
    pub debug: bool,
    /// Write the log here instead of [`default_log_file`].
    pub log_file: Option<Utf8PathBuf>,
}

/// The log file used when none is given: `installer.log` under the
/// `vistula-installer` directory of the XDG state directory.
pub fn default_log_file() -> Option<Utf8PathBuf> {
    let state = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))?;
    let state = Utf8PathBuf::from_path_buf(state).ok()?;
    Some(state.join("vistula-installer").join("installer.log"))
}

fn backup_path(path: &Utf8Path, n: u32) -> Utf8PathBuf {
    format!("{path}.{n}").into()
}

/// Shift `path` to `path.1`, `path.1` to `path.2` and so on, dropping the
/// oldest, if `path` is at least `max_bytes` long.
pub fn rotate_log_file(path: &Utf8Path, max_bytes: u64, backups: u32) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Querying {path}")),
    };
    if len < max_bytes {
        return Ok(());
    }
    if backups == 0 {
        return std::fs::remove_file(path).with_context(|| format!("Removing {path}"));
    }
    for n in (1..backups).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            let to = backup_path(path, n + 1);
            std::fs::rename(&from, &to).with_context(|| format!("Renaming {from}"))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1)).with_context(|| format!("Renaming {path}"))
}

/// Create the parent directories of `path`, rotate it if it is too large and
/// open it for appending.
pub fn open_log_file(path: &Utf8Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Creating {parent}"))?;
    }
    rotate_log_file(path, LOG_FILE_MAX_BYTES, LOG_FILE_BACKUPS)?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Opening {path}"))
}

fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing.
///
/// Logs at `info` level unless `RUST_LOG` or `--debug` says otherwise; the
/// installer's info-level output is the record of which commands ran (or
/// would run). Console output goes to `console`, and a timestamped copy is
/// appended to the log file. If the log file cannot be opened only the
/// console is used.
pub fn initialize_tracing<W>(opts: &LogOptions, console: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    // Don't include timestamps and such on the console because they're not
    // really useful and too verbose; the log file has them.
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    let console = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(console);

    let path = opts.log_file.clone().or_else(default_log_file);
    let (file, file_err) = match path.as_deref().map(open_log_file) {
        Some(Ok(f)) => (Some(f), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let file = file.map(|f| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
    });

    tracing_subscriber::registry()
        .with(env_filter(opts.debug))
        .with(console)
        .with(file)
        .init();

    if let (Some(path), Some(e)) = (path, file_err) {
        tracing::warn!("Failed to set up file logging at {path}: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_created() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        let path = dir.join("state/vistula-installer/installer.log");
        let f = open_log_file(&path)?;
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(f));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Installing to /dev/vda");
        });
        let contents = std::fs::read_to_string(&path)?;
        assert!(contents.contains("Installing to /dev/vda"), "{contents}");
        Ok(())
    }

    #[test]
    fn test_rotate_log_file() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        let path = dir.join("installer.log");

        // Missing and small files are left alone
        rotate_log_file(&path, 4, 2)?;
        std::fs::write(&path, "abc")?;
        rotate_log_file(&path, 4, 2)?;
        assert!(path.exists());

        std::fs::write(&path, "first")?;
        rotate_log_file(&path, 4, 2)?;
        assert!(!path.exists());
        std::fs::write(&path, "second")?;
        rotate_log_file(&path, 4, 2)?;
        std::fs::write(&path, "third")?;
        rotate_log_file(&path, 4, 2)?;
        assert_eq!(std::fs::read_to_string(dir.join("installer.log.1"))?, "third");
        assert_eq!(std::fs::read_to_string(dir.join("installer.log.2"))?, "second");
        assert!(!dir.join("installer.log.3").exists());
        Ok(())
    }

    #[test]
    fn test_default_log_file() {
        if let Some(p) = default_log_file() {
            assert!(p.ends_with("vistula-installer/installer.log"), "{p}");
        }
    }
}
