//! # Writing Vistula OS to a disk
//!
//! This module implements `vistula-installer install`: the running live
//! system is copied onto a (possibly freshly partitioned) disk, configured,
//! and made bootable. Every side effect goes through an [`Executor`], so in
//! dry-run mode the complete sequence of commands is logged while the
//! machine is left untouched.

// This sub-module is the "basic" installer that handles creating partitions
// and filesystems and copying the system over.
pub(crate) mod baseline;
pub mod config;
mod osconfig;
mod packages;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use vistula_blockdev::{BlkidResolver, DeviceIdentifier, IdentifierResolver};
use vistula_utils::Executor;

use self::baseline::TargetLayout;
use self::config::{InstallConfig, PartitionScheme};
use crate::software::InstallPlan;
use crate::target::TargetRoot;

/// Where the target root is mounted during installation.
pub const TARGET_MOUNT: &str = "/mnt/vistula-target";
/// Present when the system was booted via UEFI.
const EFI_FIRMWARE: &str = "/sys/firmware/efi";

/// The phases of an installation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Step {
    Partitioning,
    Formatting,
    Mounting,
    Copying,
    WritingTable,
    PreparingChroot,
    ConfiguringSystem,
    ConfiguringLocale,
    ConfiguringNetwork,
    CreatingUser,
    InstallingSoftware,
    InstallingBootloader,
    Finalizing,
    Done,
}

impl Step {
    /// A human readable description.
    pub fn label(&self) -> &'static str {
        match self {
            Step::Partitioning => "Partitioning disk",
            Step::Formatting => "Formatting partitions",
            Step::Mounting => "Mounting target",
            Step::Copying => "Copying system files",
            Step::WritingTable => "Writing fstab",
            Step::PreparingChroot => "Preparing chroot",
            Step::ConfiguringSystem => "Configuring system",
            Step::ConfiguringLocale => "Configuring locale",
            Step::ConfiguringNetwork => "Configuring network",
            Step::CreatingUser => "Creating user",
            Step::InstallingSoftware => "Installing optional software",
            Step::InstallingBootloader => "Installing bootloader",
            Step::Finalizing => "Finalizing",
            Step::Done => "Done",
        }
    }

    /// Overall progress when this step starts. Formatting comes first in
    /// manual mode, so it is reported earlier there.
    pub fn percent(&self, erase_disk: bool) -> u8 {
        match self {
            Step::Partitioning => 5,
            Step::Formatting if erase_disk => 15,
            Step::Formatting => 10,
            Step::Mounting => 25,
            Step::Copying => 45,
            Step::WritingTable => 60,
            Step::PreparingChroot => 75,
            Step::ConfiguringSystem => 80,
            Step::ConfiguringLocale => 82,
            Step::ConfiguringNetwork => 84,
            Step::CreatingUser => 85,
            Step::InstallingSoftware => 88,
            Step::InstallingBootloader => 90,
            Step::Finalizing => 95,
            Step::Done => 100,
        }
    }
}

/// Reported to the caller as each step begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 0 to 100.
    pub percent: u8,
    /// The step about to run.
    pub step: Step,
    /// Same as `step.label()`.
    pub label: &'static str,
}

impl ProgressEvent {
    fn new(step: Step, erase_disk: bool) -> Self {
        Self {
            percent: step.percent(erase_disk),
            step,
            label: step.label(),
        }
    }
}

/// A configuration that cannot be installed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No target disk was chosen.
    #[error("No target disk selected")]
    NoTargetDisk,
    /// Manual partitioning without a root partition.
    #[error("No root partition selected")]
    NoRootPartition,
    /// Manual partitioning on a UEFI host without an EFI system partition.
    #[error("An EFI system partition is required on UEFI systems")]
    MissingEfiPartition,
    /// The same device was chosen for two roles.
    #[error("Partition {0} is selected more than once")]
    DuplicatePartitions(Utf8PathBuf),
    /// No password for the user account.
    #[error("No password set for the user account")]
    MissingPassword,
    /// The Wi-Fi network name or passphrase would break the connection
    /// profile.
    #[error("The Wi-Fi network name and passphrase must not contain control characters")]
    InvalidWifiCredentials,
}

/// Installing for real requires root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Installation requires superuser privileges (or use --dry-run)")]
pub struct PermissionError;

/// Facts about the machine we are running on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Booted via UEFI; decides the bootloader flavor and whether an EFI
    /// system partition is required.
    pub efi: bool,
    /// Running with an effective uid of 0.
    pub superuser: bool,
    /// The root of the running system, which is copied to the target.
    pub live_root: Utf8PathBuf,
}

impl Host {
    /// Inspect the running system.
    #[context("Detecting host")]
    pub fn detect() -> Result<Self> {
        let efi = Utf8Path::new(EFI_FIRMWARE)
            .try_exists()
            .with_context(|| format!("Querying {EFI_FIRMWARE}"))?;
        let superuser = rustix::process::geteuid().is_root();
        let r = Self {
            efi,
            superuser,
            live_root: "/".into(),
        };
        tracing::debug!("Host: {r:?}");
        Ok(r)
    }
}

/// Used to preview a mount table before the partitions exist: the predicted
/// device paths are used as-is.
#[derive(Debug)]
struct PredictedResolver;

impl IdentifierResolver for PredictedResolver {
    fn identifier(&self, _dev: &str) -> Option<DeviceIdentifier> {
        None
    }

    fn filesystem_type(&self, _dev: &str, fallback: &str) -> String {
        fallback.to_owned()
    }
}

fn first_duplicate<'a>(devs: impl IntoIterator<Item = &'a Utf8Path>) -> Option<&'a Utf8Path> {
    let mut seen = std::collections::HashSet::new();
    devs.into_iter().find(|d| !seen.insert(*d))
}

/// Performs one installation.
#[derive(Debug)]
pub struct InstallationEngine<E> {
    exec: E,
    config: InstallConfig,
    host: Host,
}

impl<E: Executor> InstallationEngine<E> {
    /// Create an engine for the running host.
    pub fn new(exec: E, config: InstallConfig) -> Result<Self> {
        let host = Host::detect()?;
        Ok(Self::with_host(exec, config, host))
    }

    /// Create an engine with an explicitly provided host description.
    pub fn with_host(exec: E, config: InstallConfig, host: Host) -> Self {
        Self { exec, config, host }
    }

    /// The configuration being installed.
    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// The host being installed from.
    pub fn host(&self) -> &Host {
        &self.host
    }

    fn erase_disk(&self) -> bool {
        matches!(self.config.partitioning, PartitionScheme::EraseDisk)
    }

    /// Check that the configuration can be installed on this host.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let config = &self.config;
        if config.target_disk().is_none() {
            return Err(ValidationError::NoTargetDisk);
        }
        if let PartitionScheme::Manual(m) = &config.partitioning {
            let layout = TargetLayout::for_manual(m)?;
            if self.host.efi && layout.efi.is_none() {
                return Err(ValidationError::MissingEfiPartition);
            }
            let devs = [&layout.efi, &layout.home, &layout.swap]
                .into_iter()
                .filter_map(|d| d.as_deref())
                .chain(std::iter::once(layout.root.as_path()));
            if let Some(dup) = first_duplicate(devs) {
                return Err(ValidationError::DuplicatePartitions(dup.to_owned()));
            }
        }
        if config.password.is_empty() {
            return Err(ValidationError::MissingPassword);
        }
        let net = &config.network;
        if [net.wifi_ssid.as_str(), net.wifi_passphrase.expose()]
            .iter()
            .any(|v| v.chars().any(char::is_control))
        {
            return Err(ValidationError::InvalidWifiCredentials);
        }
        Ok(())
    }

    /// The mount table the installation would write. In erase-disk mode the
    /// partitions do not exist yet, so their predicted paths are shown.
    pub fn planned_mount_table(&self) -> Result<String> {
        let layout = TargetLayout::for_config(&self.config)?;
        let blkid;
        let resolver: &dyn IdentifierResolver = if self.erase_disk() {
            &PredictedResolver
        } else {
            blkid = BlkidResolver::new(&self.exec);
            &blkid
        };
        Ok(mount_table(resolver, &layout))
    }

    /// Install, calling `progress` as each step begins. The final event is
    /// [`Step::Done`]. A failure aborts the installation; nothing done up to
    /// that point is undone.
    pub fn run_install(&self, mut progress: impl FnMut(&ProgressEvent)) -> Result<()> {
        let erase = self.erase_disk();
        let mut report = |step: Step| {
            let ev = ProgressEvent::new(step, erase);
            tracing::info!("{}% {}", ev.percent, ev.label);
            progress(&ev);
        };

        self.validate()?;
        let dry_run = self.exec.dry_run();
        if !dry_run && !self.host.superuser {
            return Err(PermissionError.into());
        }
        if dry_run {
            tracing::info!("Dry run: no changes will be made");
        }
        let exec: &dyn Executor = &self.exec;
        let config = &self.config;
        let disk = config.target_disk().ok_or(ValidationError::NoTargetDisk)?;
        let target = Utf8Path::new(TARGET_MOUNT);

        let layout = match &config.partitioning {
            PartitionScheme::EraseDisk => {
                report(Step::Partitioning);
                let layout = baseline::partition_erase_disk(exec, disk)?;
                report(Step::Formatting);
                baseline::format_erased(exec, &layout)?;
                layout
            }
            PartitionScheme::Manual(m) => {
                report(Step::Formatting);
                baseline::format_manual(exec, m)?;
                TargetLayout::for_manual(m)?
            }
        };

        report(Step::Mounting);
        crate::mount::mount_layout(exec, &layout, target)?;

        report(Step::Copying);
        baseline::copy_live_system(exec, target)?;

        report(Step::WritingTable);
        let root = TargetRoot::open(target, dry_run, &self.host.live_root)?;
        write_mount_table(exec, &root, &layout)?;

        report(Step::PreparingChroot);
        crate::mount::bind_api_filesystems(exec, target)?;

        report(Step::ConfiguringSystem);
        osconfig::write_identity(&root, &config.hostname)?;
        osconfig::configure_timezone(&root, &config.timezone)?;
        osconfig::configure_keyboard(&root, &config.keyboard_layout)?;

        report(Step::ConfiguringLocale);
        osconfig::configure_locale(
            exec,
            &root,
            &config.locale,
            &config.keyboard_layout,
            config.generate_all_locales,
        )?;

        report(Step::ConfiguringNetwork);
        osconfig::configure_network(exec, &root, &config.network)?;

        report(Step::CreatingUser);
        osconfig::create_user(exec, &root, &config.username, &config.password)?;

        report(Step::InstallingSoftware);
        let plan = InstallPlan::for_selection(&config.software);
        packages::install_software(exec, &root, &plan)?;

        report(Step::InstallingBootloader);
        crate::bootloader::install_grub(exec, &root, self.host.efi, disk, &config.bootloader_id)?;

        report(Step::Finalizing);
        crate::mount::teardown(exec, target, layout.swap.as_deref())?;

        report(Step::Done);
        Ok(())
    }
}

fn mount_table(resolver: &dyn IdentifierResolver, layout: &TargetLayout) -> String {
    crate::fstab::build_mount_table(
        resolver,
        &layout.root,
        layout.efi.as_deref(),
        layout.home.as_deref(),
        layout.swap.as_deref(),
    )
}

#[context("Writing fstab")]
fn write_mount_table(exec: &dyn Executor, root: &TargetRoot, layout: &TargetLayout) -> Result<()> {
    let table = mount_table(&BlkidResolver::new(exec), layout);
    root.write("etc/fstab", &table)
}
