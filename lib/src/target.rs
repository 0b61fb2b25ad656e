//! Access to the filesystem of the system being installed.

use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::{Dir, Permissions};
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;
use vistula_utils::Cmd;

/// The mounted target root, or a stand-in for it in dry-run mode.
///
/// In dry-run mode nothing is written; writes are logged instead. Since the
/// target would be a copy of the running system, existence checks and reads
/// are answered from the live root, so that the same commands are logged as
/// in a real run.
#[derive(Debug)]
pub(crate) enum TargetRoot {
    /// The target filesystem, mounted at `path`.
    Mounted { path: Utf8PathBuf, dir: Dir },
    /// Dry run; `live` is the running system's root.
    Preview { path: Utf8PathBuf, live: Dir },
}

impl TargetRoot {
    #[context("Opening target root {path}")]
    pub(crate) fn open(path: &Utf8Path, dry_run: bool, live_root: &Utf8Path) -> Result<Self> {
        let path = path.to_owned();
        let r = if dry_run {
            let live = Dir::open_ambient_dir(live_root, cap_std::ambient_authority())
                .with_context(|| format!("Opening {live_root}"))?;
            Self::Preview { path, live }
        } else {
            let dir = Dir::open_ambient_dir(&path, cap_std::ambient_authority())?;
            Self::Mounted { path, dir }
        };
        Ok(r)
    }

    /// Where the target is (or would be) mounted.
    pub(crate) fn path(&self) -> &Utf8Path {
        match self {
            Self::Mounted { path, .. } | Self::Preview { path, .. } => path,
        }
    }

    fn dir(&self) -> &Dir {
        match self {
            Self::Mounted { dir, .. } => dir,
            Self::Preview { live, .. } => live,
        }
    }

    /// Absolute path of `rel` in the target, for messages.
    pub(crate) fn display(&self, rel: &str) -> Utf8PathBuf {
        self.path().join(rel)
    }

    /// A command run inside the target via `chroot`.
    pub(crate) fn chroot(&self, exe: &str) -> Cmd {
        Cmd::new("chroot").args([self.path().as_str(), exe])
    }

    pub(crate) fn exists(&self, rel: &str) -> Result<bool> {
        self.dir()
            .try_exists(rel)
            .with_context(|| format!("Querying {}", self.display(rel)))
    }

    pub(crate) fn read_to_string(&self, rel: &str) -> Result<String> {
        let buf = self
            .dir()
            .read(rel)
            .with_context(|| format!("Reading {}", self.display(rel)))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn ensure_parent(dir: &Dir, rel: &str) -> Result<()> {
        if let Some(parent) = Utf8Path::new(rel)
            .parent()
            .filter(|p| !p.as_str().is_empty())
        {
            dir.create_dir_all(parent)
                .with_context(|| format!("Creating {parent}"))?;
        }
        Ok(())
    }

    /// Atomically replace `rel` with `contents`, creating parent directories.
    pub(crate) fn write(&self, rel: &str, contents: &str) -> Result<()> {
        match self {
            Self::Mounted { dir, .. } => {
                Self::ensure_parent(dir, rel)?;
                dir.atomic_write(rel, contents)
                    .with_context(|| format!("Writing {}", self.display(rel)))
            }
            Self::Preview { .. } => {
                tracing::info!("[DRY-RUN] write {}:\n{contents}", self.display(rel));
                Ok(())
            }
        }
    }

    /// Like [`Self::write`] but readable only by root; the contents are not
    /// logged in dry-run mode.
    pub(crate) fn write_private(&self, rel: &str, contents: &str) -> Result<()> {
        match self {
            Self::Mounted { dir, .. } => {
                Self::ensure_parent(dir, rel)?;
                let perms = Permissions::from_std(std::fs::Permissions::from_mode(0o600));
                dir.atomic_write_with_perms(rel, contents, perms)
                    .with_context(|| format!("Writing {}", self.display(rel)))
            }
            Self::Preview { .. } => {
                tracing::info!("[DRY-RUN] write {} (mode 0600)", self.display(rel));
                Ok(())
            }
        }
    }

    /// Replace `rel` with a symbolic link to `link_target`.
    pub(crate) fn symlink(&self, link_target: &str, rel: &str) -> Result<()> {
        match self {
            Self::Mounted { dir, .. } => {
                Self::ensure_parent(dir, rel)?;
                dir.remove_file_optional(rel)?;
                dir.symlink(link_target, rel)
                    .with_context(|| format!("Linking {}", self.display(rel)))
            }
            Self::Preview { .. } => {
                tracing::info!("[DRY-RUN] ln -sf {link_target} {}", self.display(rel));
                Ok(())
            }
        }
    }
}
