//! Installing the optional software chosen for the target.

use anyhow::Result;
use fn_error_context::context;
use vistula_utils::Executor;

use crate::software::InstallPlan;
use crate::target::TargetRoot;

const PACMAN: &str = "usr/bin/pacman";
const FLATPAK: &str = "usr/bin/flatpak";
const FLATHUB: &str = "flathub";
const FLATHUB_REPO: &str = "https://flathub.org/repo/flathub.flatpakrepo";

/// Install the planned packages and apps inside the target. Each command is
/// allowed to fail; a missing package manager is only logged.
#[context("Installing optional software")]
pub(crate) fn install_software(
    exec: &dyn Executor,
    target: &TargetRoot,
    plan: &InstallPlan,
) -> Result<()> {
    if !plan.system_packages.is_empty() {
        if target.exists(PACMAN)? {
            let cmd = target
                .chroot("pacman")
                .args(["-S", "--noconfirm", "--needed"])
                .args(&plan.system_packages)
                .unchecked();
            let out = exec.run(cmd)?;
            if out.code != 0 {
                tracing::warn!("Package installation failed ({})", out.code);
            }
        } else {
            tracing::info!(
                "No pacman in target; skipping packages: {}",
                plan.system_packages.join(" ")
            );
        }
    }

    if plan.sandboxed_apps.is_empty() {
        return Ok(());
    }
    if !target.exists(FLATPAK)? {
        tracing::info!(
            "No flatpak in target; skipping apps: {}",
            plan.sandboxed_apps.join(" ")
        );
        return Ok(());
    }
    exec.run(
        target
            .chroot("flatpak")
            .args(["remote-add", "--if-not-exists", FLATHUB, FLATHUB_REPO])
            .unchecked(),
    )?;
    for app in &plan.sandboxed_apps {
        let out = exec.run(
            target
                .chroot("flatpak")
                .args(["install", "-y", FLATHUB, app.as_str()])
                .unchecked(),
        )?;
        if out.code != 0 {
            tracing::warn!("Failed to install {app} ({})", out.code);
        }
    }
    Ok(())
}
