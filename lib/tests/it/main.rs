//! Integration tests for vistula-lib.

use std::sync::Mutex;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use vistula_lib::install::config::{InstallConfig, ManualPartitions, PartitionScheme, Secret};
use vistula_lib::install::{Host, InstallationEngine, ProgressEvent, Step, ValidationError};
use vistula_utils::{Cmd, CommandOutput, Executor};

/// Pretends to be a dry-run runner, recording every command it is handed.
#[derive(Debug, Default)]
struct RecordingExecutor {
    cmds: Mutex<Vec<Cmd>>,
}

impl Executor for RecordingExecutor {
    fn dry_run(&self) -> bool {
        true
    }

    fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
        self.cmds.lock().unwrap().push(cmd);
        Ok(CommandOutput::default())
    }
}

impl RecordingExecutor {
    fn lines(&self) -> Vec<String> {
        self.cmds
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.argv().join(" "))
            .collect()
    }
}

/// A fake live system with the tools the installer looks for.
fn live_root() -> Result<(tempfile::TempDir, Utf8PathBuf)> {
    let td = tempfile::tempdir()?;
    let root = Utf8Path::from_path(td.path()).unwrap().to_owned();
    std::fs::create_dir_all(root.join("usr/bin"))?;
    std::fs::write(root.join("usr/bin/pacman"), "")?;
    std::fs::write(root.join("usr/bin/flatpak"), "")?;
    std::fs::create_dir_all(root.join("usr/share/zoneinfo/Europe"))?;
    std::fs::write(root.join("usr/share/zoneinfo/Europe/Warsaw"), "TZif")?;
    std::fs::create_dir_all(root.join("etc"))?;
    std::fs::write(root.join("etc/locale.gen"), "#pl_PL.UTF-8 UTF-8\n")?;
    Ok((td, root))
}

fn uefi_host(live_root: &Utf8Path) -> Host {
    Host {
        efi: true,
        superuser: false,
        live_root: live_root.to_owned(),
    }
}

fn erase_config() -> InstallConfig {
    let mut c = InstallConfig {
        target_disk: Some("/dev/sda".into()),
        password: Secret::new("hunter2"),
        ..Default::default()
    };
    c.network.wifi_ssid = "Dom".into();
    c.network.wifi_passphrase = Secret::new("tajne");
    c.software.nvidia_driver = true;
    c.software.extra_apps = vec!["org.mozilla.firefox".into()];
    c
}

#[test]
fn test_erase_disk_dry_run() -> Result<()> {
    let (_td, live) = live_root()?;
    let exec = RecordingExecutor::default();
    let engine = InstallationEngine::with_host(&exec, erase_config(), uefi_host(&live));
    let mut events: Vec<ProgressEvent> = Vec::new();
    engine.run_install(|ev| events.push(*ev))?;

    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert_eq!(
        percents,
        [5, 15, 25, 45, 60, 75, 80, 82, 84, 85, 88, 90, 95, 100]
    );
    let last = events.last().unwrap();
    assert_eq!(last.step, Step::Done);
    assert_eq!(last.label, "Done");
    assert_eq!(events[0].label, "Partitioning disk");

    // Only read-only lookups would have actually run
    for cmd in exec.cmds.lock().unwrap().iter() {
        let is_blkid = cmd.argv()[0] == "blkid";
        assert_eq!(cmd.is_allowed_in_dry_run(), is_blkid, "{cmd:?}");
    }

    let lines = exec.lines();
    let t = "/mnt/vistula-target";
    let arch = if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        "x86_64"
    };
    assert_eq!(
        &lines[..7],
        [
            "wipefs -a /dev/sda",
            "parted -s /dev/sda mklabel gpt",
            "parted -s /dev/sda mkpart EFI fat32 1MiB 513MiB",
            "parted -s /dev/sda set 1 esp on",
            "parted -s /dev/sda mkpart ROOT ext4 513MiB 100%",
            "mkfs.vfat -F 32 /dev/sda1",
            "mkfs.ext4 -F /dev/sda2",
        ]
    );
    for expected in [
        format!("mkdir -p {t}"),
        format!("mount /dev/sda2 {t}"),
        format!("mkdir -p {t}/boot/efi"),
        format!("mount /dev/sda1 {t}/boot/efi"),
        format!("mount --bind /dev {t}/dev"),
        format!("chroot {t} useradd -m -s /bin/bash user"),
        format!("chroot {t} chpasswd"),
        format!("chroot {t} pacman -S --noconfirm --needed nvidia nvidia-utils lib32-nvidia-utils"),
        format!("chroot {t} flatpak install -y flathub org.mozilla.firefox"),
        format!("chroot {t} grub-install --target={arch}-efi --efi-directory=/boot/efi --bootloader-id=VistulaOS"),
    ] {
        assert!(lines.contains(&expected), "missing: {expected}");
    }
    assert!(lines.iter().any(|l| l.starts_with("rsync -aAXH --numeric-ids")));
    assert_eq!(lines.last().unwrap(), &format!("umount -R {t}"));
    // No swap in erase-disk mode
    assert!(!lines.iter().any(|l| l.starts_with("swap")));

    // Nothing was written to the live system
    assert!(!live.join("etc/hostname").exists());
    assert!(!live.join("etc/fstab").exists());
    assert_eq!(
        std::fs::read_to_string(live.join("etc/locale.gen"))?,
        "#pl_PL.UTF-8 UTF-8\n"
    );
    Ok(())
}

#[test]
fn test_manual_dry_run() -> Result<()> {
    let (_td, live) = live_root()?;
    let exec = RecordingExecutor::default();
    let config = InstallConfig {
        target_disk: Some("/dev/sda".into()),
        password: Secret::new("hunter2"),
        partitioning: PartitionScheme::Manual(ManualPartitions {
            root: Some("/dev/sda3".into()),
            efi: Some("/dev/sda1".into()),
            swap: Some("/dev/sda2".into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let host = Host {
        efi: false,
        ..uefi_host(&live)
    };
    let engine = InstallationEngine::with_host(&exec, config, host);
    let mut events = Vec::new();
    engine.run_install(|ev| events.push((ev.percent, ev.label)))?;
    assert_eq!(events[0], (10, "Formatting partitions"));
    assert_eq!(events.len(), 13);
    assert_eq!(events.last(), Some(&(100, "Done")));

    let lines = exec.lines();
    assert_eq!(lines[0], "mkfs.ext4 -F /dev/sda3");
    assert!(!lines.iter().any(|l| l.starts_with("wipefs") || l.starts_with("parted")));
    assert!(lines.contains(&"swapon /dev/sda2".to_owned()));
    assert!(lines.contains(&"chroot /mnt/vistula-target grub-install --target=i386-pc /dev/sda".to_owned()));
    let n = lines.len();
    assert_eq!(
        &lines[n - 2..],
        ["swapoff /dev/sda2", "umount -R /mnt/vistula-target"]
    );
    Ok(())
}

#[test]
fn test_invalid_config_runs_nothing() -> Result<()> {
    let (_td, live) = live_root()?;
    let exec = RecordingExecutor::default();
    let mut config = erase_config();
    config.password = Secret::default();
    let engine = InstallationEngine::with_host(&exec, config, uefi_host(&live));
    assert_eq!(engine.validate(), Err(ValidationError::MissingPassword));
    let mut events = 0;
    let e = engine.run_install(|_| events += 1).unwrap_err();
    assert_eq!(
        e.downcast_ref::<ValidationError>(),
        Some(&ValidationError::MissingPassword)
    );
    assert_eq!(events, 0);
    assert!(exec.lines().is_empty());
    Ok(())
}

fn collect_sources(dir: &Utf8Path, out: &mut Vec<Utf8PathBuf>) -> Result<()> {
    for entry in dir.read_dir_utf8()? {
        let path = entry?.into_path();
        if path.is_dir() {
            collect_sources(&path, out)?;
        } else if path.extension() == Some("rs") {
            out.push(path);
        }
    }
    Ok(())
}

#[test]
fn test_modules_documented() -> Result<()> {
    let src = Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut sources = Vec::new();
    collect_sources(&src, &mut sources)?;
    assert!(sources.len() > 10);
    let undocumented = sources
        .iter()
        .filter(|p| {
            std::fs::read_to_string(p)
                .map(|s| !s.starts_with("//!"))
                .unwrap_or(true)
        })
        .collect::<Vec<_>>();
    assert!(undocumented.is_empty(), "Missing module docs: {undocumented:?}");
    Ok(())
}
