//! Helpers for interacting with mountpoints

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;
use vistula_utils::{Cmd, Executor};

use crate::install::baseline::TargetLayout;

/// Pseudo filesystems made visible inside the target for `chroot`.
const API_FILESYSTEMS: &[&str] = &["dev", "proc", "sys"];

/// Create a directory (and its parents).
pub(crate) fn mkdir_p(exec: &dyn Executor, path: &Utf8Path) -> Result<()> {
    exec.run(Cmd::new("mkdir").args(["-p", path.as_str()]))?;
    Ok(())
}

/// Mount a device to the target path.
pub(crate) fn mount(exec: &dyn Executor, dev: &Utf8Path, target: &Utf8Path) -> Result<()> {
    exec.run(Cmd::new("mount").args([dev.as_str(), target.as_str()]))?;
    Ok(())
}

/// Mount the chosen partitions below `target`: root, then `/home` and
/// `/boot/efi`, and enable swap.
#[context("Mounting target")]
pub(crate) fn mount_layout(
    exec: &dyn Executor,
    layout: &TargetLayout,
    target: &Utf8Path,
) -> Result<()> {
    mkdir_p(exec, target)?;
    mount(exec, &layout.root, target)?;
    let children = [("home", layout.home.as_deref()), ("boot/efi", layout.efi.as_deref())];
    for (sub, dev) in children {
        let Some(dev) = dev else {
            continue;
        };
        let mountpoint = target.join(sub);
        mkdir_p(exec, &mountpoint)?;
        mount(exec, dev, &mountpoint)?;
    }
    if let Some(swap) = layout.swap.as_deref() {
        exec.run(Cmd::new("swapon").arg(swap.as_str()).unchecked())?;
    }
    Ok(())
}

/// Bind mount the host's API filesystems into the target.
#[context("Preparing chroot")]
pub(crate) fn bind_api_filesystems(exec: &dyn Executor, target: &Utf8Path) -> Result<()> {
    for fs in API_FILESYSTEMS {
        let dest = target.join(fs);
        exec.run(Cmd::new("mount").args(["--bind", &format!("/{fs}"), dest.as_str()]))?;
    }
    Ok(())
}

/// Disable swap and unmount everything below `target`. Failures are
/// tolerated; the installation itself is complete at this point.
pub(crate) fn teardown(exec: &dyn Executor, target: &Utf8Path, swap: Option<&Utf8Path>) -> Result<()> {
    if let Some(swap) = swap {
        exec.run(Cmd::new("swapoff").arg(swap.as_str()).unchecked())?;
    }
    exec.run(Cmd::new("umount").args(["-R", target.as_str()]).unchecked())?;
    Ok(())
}
