//! # Bootloader installation
//!
//! Installs GRUB into the target from inside a chroot: the EFI flavor onto
//! the mounted EFI system partition on UEFI hosts, otherwise the BIOS
//! flavor onto the target disk. The configuration is then regenerated.

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;
use vistula_utils::Executor;

use crate::target::TargetRoot;

/// Where the EFI system partition is mounted, inside the target.
pub(crate) const EFI_DIR: &str = "/boot/efi";

/// The GRUB EFI platform for the architecture we were built for.
fn efi_platform() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64-efi",
        _ => "x86_64-efi",
    }
}

/// Regenerate the GRUB configuration, preferring the `update-grub` wrapper.
const MKCONFIG: &str =
    "command -v update-grub >/dev/null 2>&1 && update-grub || grub-mkconfig -o /boot/grub/grub.cfg";

#[context("Installing bootloader")]
pub(crate) fn install_grub(
    exec: &dyn Executor,
    target: &TargetRoot,
    efi: bool,
    disk: &Utf8Path,
    bootloader_id: &str,
) -> Result<()> {
    let cmd = target.chroot("grub-install");
    let cmd = if efi {
        cmd.arg(format!("--target={}", efi_platform()))
            .arg(format!("--efi-directory={EFI_DIR}"))
            .arg(format!("--bootloader-id={bootloader_id}"))
    } else {
        cmd.args(["--target=i386-pc", disk.as_str()])
    };
    exec.run(cmd)?;
    exec.run(target.chroot("bash").args(["-lc", MKCONFIG]))?;
    Ok(())
}
