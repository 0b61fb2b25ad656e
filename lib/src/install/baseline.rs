//! # Preparing the target disk
//!
//! Either the whole disk is wiped and given a fresh GPT with an EFI system
//! partition and a root partition, or partitions the user chose are
//! (optionally) reformatted. Afterwards the running system is copied over.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use vistula_utils::{Cmd, Executor};

use super::config::{InstallConfig, ManualPartitions, PartitionScheme};
use super::ValidationError;

const EFIPN: u32 = 1;
const ROOTPN: u32 = 2;
/// The EFI system partition spans 1MiB up to this offset.
const EFIPN_END: &str = "513MiB";

/// Paths excluded when copying the live system.
const COPY_EXCLUDES: &[&str] = &[
    "/dev/*",
    "/proc/*",
    "/sys/*",
    "/run/*",
    "/tmp/*",
    "/mnt/*",
    "/media/*",
    "/lost+found",
];

/// Which partition serves which role in the installed system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TargetLayout {
    pub(crate) root: Utf8PathBuf,
    pub(crate) efi: Option<Utf8PathBuf>,
    pub(crate) home: Option<Utf8PathBuf>,
    pub(crate) swap: Option<Utf8PathBuf>,
}

impl TargetLayout {
    /// The partitions an erased `disk` will end up with.
    pub(crate) fn for_erased_disk(disk: &Utf8Path) -> Self {
        let part = |n| Utf8PathBuf::from(vistula_blockdev::partition_path(disk.as_str(), n));
        Self {
            root: part(ROOTPN),
            efi: Some(part(EFIPN)),
            home: None,
            swap: None,
        }
    }

    pub(crate) fn for_manual(m: &ManualPartitions) -> Result<Self, ValidationError> {
        let root = m.root().ok_or(ValidationError::NoRootPartition)?;
        Ok(Self {
            root: root.to_owned(),
            efi: m.efi().map(ToOwned::to_owned),
            home: m.home().map(ToOwned::to_owned),
            swap: m.swap().map(ToOwned::to_owned),
        })
    }

    /// The layout a configuration asks for.
    pub(crate) fn for_config(config: &InstallConfig) -> Result<Self, ValidationError> {
        match &config.partitioning {
            PartitionScheme::EraseDisk => {
                let disk = config.target_disk().ok_or(ValidationError::NoTargetDisk)?;
                Ok(Self::for_erased_disk(disk))
            }
            PartitionScheme::Manual(m) => Self::for_manual(m),
        }
    }
}

fn parted(disk: &Utf8Path) -> Cmd {
    Cmd::new("parted").args(["-s", disk.as_str()])
}

#[context("Partitioning disk")]
/// Wipe `disk` and create a GPT with an EFI system partition and a root
/// partition filling the rest of the disk.
pub(crate) fn partition_erase_disk(exec: &dyn Executor, disk: &Utf8Path) -> Result<TargetLayout> {
    exec.run(Cmd::new("wipefs").args(["-a", disk.as_str()]))?;
    exec.run(parted(disk).args(["mklabel", "gpt"]))?;
    exec.run(parted(disk).args(["mkpart", "EFI", "fat32", "1MiB", EFIPN_END]))?;
    exec.run(parted(disk).args(["set", "1", "esp", "on"]))?;
    exec.run(parted(disk).args(["mkpart", "ROOT", "ext4", EFIPN_END, "100%"]))?;
    let layout = TargetLayout::for_erased_disk(disk);
    tracing::debug!("Created partitions: {layout:?}");
    Ok(layout)
}

fn mkfs_ext4(exec: &dyn Executor, dev: &Utf8Path) -> Result<()> {
    exec.run(Cmd::new("mkfs.ext4").args(["-F", dev.as_str()]))?;
    Ok(())
}

fn mkfs_vfat(exec: &dyn Executor, dev: &Utf8Path) -> Result<()> {
    exec.run(Cmd::new("mkfs.vfat").args(["-F", "32", dev.as_str()]))?;
    Ok(())
}

#[context("Formatting partitions")]
/// Create the filesystems on a freshly partitioned disk.
pub(crate) fn format_erased(exec: &dyn Executor, layout: &TargetLayout) -> Result<()> {
    if let Some(efi) = layout.efi.as_deref() {
        mkfs_vfat(exec, efi)?;
    }
    mkfs_ext4(exec, &layout.root)
}

#[context("Formatting partitions")]
/// Format the manually chosen partitions the user asked to format.
pub(crate) fn format_manual(exec: &dyn Executor, m: &ManualPartitions) -> Result<()> {
    let root = m.root().context("No root partition")?;
    if m.format_root {
        mkfs_ext4(exec, root)?;
    }
    if let Some(efi) = m.efi().filter(|_| m.format_efi) {
        mkfs_vfat(exec, efi)?;
    }
    if let Some(home) = m.home().filter(|_| m.format_home) {
        mkfs_ext4(exec, home)?;
    }
    if let Some(swap) = m.swap().filter(|_| m.format_swap) {
        exec.run(Cmd::new("mkswap").arg(swap.as_str()))?;
    }
    Ok(())
}

#[context("Copying system files")]
/// Copy the running system into the mounted target, preserving ownership,
/// ACLs, xattrs and hard links.
pub(crate) fn copy_live_system(exec: &dyn Executor, target: &Utf8Path) -> Result<()> {
    let excludes = COPY_EXCLUDES.iter().map(|e| format!("--exclude={e}"));
    let cmd = Cmd::new("rsync")
        .args(["-aAXH", "--numeric-ids"])
        .args(excludes)
        .args(["/", target.as_str()]);
    exec.run(cmd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Recorder;

    #[test]
    fn test_erase_disk() -> Result<()> {
        let r = Recorder::default();
        let layout = partition_erase_disk(&r, Utf8Path::new("/dev/nvme0n1"))?;
        format_erased(&r, &layout)?;
        assert_eq!(layout.efi.as_deref().unwrap().as_str(), "/dev/nvme0n1p1");
        assert_eq!(layout.root, "/dev/nvme0n1p2");
        similar_asserts::assert_eq!(
            r.lines(),
            [
                "wipefs -a /dev/nvme0n1",
                "parted -s /dev/nvme0n1 mklabel gpt",
                "parted -s /dev/nvme0n1 mkpart EFI fat32 1MiB 513MiB",
                "parted -s /dev/nvme0n1 set 1 esp on",
                "parted -s /dev/nvme0n1 mkpart ROOT ext4 513MiB 100%",
                "mkfs.vfat -F 32 /dev/nvme0n1p1",
                "mkfs.ext4 -F /dev/nvme0n1p2",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_format_manual() -> Result<()> {
        let r = Recorder::default();
        let m = ManualPartitions {
            root: Some("/dev/sda3".into()),
            efi: Some("/dev/sda1".into()),
            home: Some("/dev/sda4".into()),
            swap: Some("/dev/sda2".into()),
            format_root: true,
            format_efi: false,
            format_home: true,
            format_swap: true,
        };
        format_manual(&r, &m)?;
        assert_eq!(
            r.lines(),
            [
                "mkfs.ext4 -F /dev/sda3",
                "mkfs.ext4 -F /dev/sda4",
                "mkswap /dev/sda2"
            ]
        );

        let r = Recorder::default();
        let m = ManualPartitions {
            root: Some("/dev/sda3".into()),
            format_root: false,
            format_efi: true,
            ..Default::default()
        };
        format_manual(&r, &m)?;
        assert!(r.lines().is_empty());
        Ok(())
    }

    #[test]
    fn test_layout() {
        let mut c = InstallConfig::default();
        assert_eq!(
            TargetLayout::for_config(&c),
            Err(ValidationError::NoTargetDisk)
        );
        c.target_disk = Some("/dev/sda".into());
        let l = TargetLayout::for_config(&c).unwrap();
        assert_eq!(l.root, "/dev/sda2");
        c.partitioning = PartitionScheme::Manual(ManualPartitions {
            root: Some("/dev/sdb1".into()),
            swap: Some("".into()),
            ..Default::default()
        });
        let l = TargetLayout::for_config(&c).unwrap();
        assert_eq!(l.root, "/dev/sdb1");
        assert!(l.efi.is_none());
        assert!(l.swap.is_none());
    }

    #[test]
    fn test_copy() -> Result<()> {
        let r = Recorder::default();
        copy_live_system(&r, Utf8Path::new("/mnt/vistula-target"))?;
        assert_eq!(
            r.cmds.borrow()[0].argv(),
            [
                "rsync",
                "-aAXH",
                "--numeric-ids",
                "--exclude=/dev/*",
                "--exclude=/proc/*",
                "--exclude=/sys/*",
                "--exclude=/run/*",
                "--exclude=/tmp/*",
                "--exclude=/mnt/*",
                "--exclude=/media/*",
                "--exclude=/lost+found",
                "/",
                "/mnt/vistula-target"
            ]
        );
        Ok(())
    }
}
