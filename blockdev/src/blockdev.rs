//! Block device discovery for the installer.
//!
//! Disks and partitions come from the JSON output of `lsblk`, and stable
//! filesystem identifiers from `blkid`. Nothing here is cached: hardware
//! state can change between two calls, so each call re-runs its command.

use anyhow::{Context, Result};
use fn_error_context::context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use vistula_utils::{Cmd, Executor};

mod blkid;
pub use blkid::*;
mod suggest;
pub use suggest::*;

const DISK_COLUMNS: &str = "NAME,SIZE,TYPE,MODEL";
const PARTITION_COLUMNS: &str = "NAME,SIZE,TYPE,FSTYPE,LABEL,MOUNTPOINT";

#[derive(Debug, Deserialize)]
struct DevicesOutput {
    #[serde(default)]
    blockdevices: Vec<Device>,
}

/// `lsblk` reports sizes as text ("953.9G"), or as a number with `-b`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Size {
    Text(String),
    Bytes(u64),
}

impl Size {
    fn render(&self) -> String {
        match self {
            Size::Text(s) => s.clone(),
            Size::Bytes(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Device {
    name: Option<String>,
    size: Option<Size>,
    #[serde(rename = "type")]
    kind: Option<String>,
    model: Option<String>,
    fstype: Option<String>,
    label: Option<String>,
    mountpoint: Option<String>,
    children: Option<Vec<Device>>,
}

impl Device {
    // Older lsblk doesn't have PATH, so we do it
    fn path(&self) -> Option<String> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(|n| format!("/dev/{n}"))
    }

    fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }

    fn size(&self) -> String {
        self.size.as_ref().map(Size::render).unwrap_or_default()
    }
}

/// A whole disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    /// Device node, e.g. `/dev/sda`.
    pub path: String,
    /// Human readable size as reported by lsblk.
    pub size: String,
    /// Vendor model string, may be empty.
    pub model: String,
}

/// A partition somewhere below a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    /// Device node, e.g. `/dev/nvme0n1p2`.
    pub path: String,
    /// Human readable size as reported by lsblk.
    pub size: String,
    /// Filesystem type, empty if unformatted or unknown.
    pub fstype: String,
    /// Filesystem label, may be empty.
    pub label: String,
    /// Where the partition is mounted in the running system; empty if unmounted.
    pub mountpoint: String,
}

impl PartitionInfo {
    /// Whether the partition is in use by the running system.
    pub fn is_mounted(&self) -> bool {
        !self.mountpoint.trim().is_empty()
    }
}

fn parse_devices(json: &str) -> Result<Vec<Device>> {
    let o: DevicesOutput = serde_json::from_str(json).context("Parsing lsblk output")?;
    Ok(o.blockdevices)
}

fn lsblk<E: Executor + ?Sized>(exec: &E, columns: &str) -> Result<String> {
    let o = exec.run(
        Cmd::new("lsblk")
            .args(["-J", "-o", columns])
            // Sizes use a comma as decimal separator in some locales
            .env("LC_ALL", "C")
            .allow_in_dry_run(),
    )?;
    Ok(o.stdout)
}

/// Parse `lsblk -J -o NAME,SIZE,TYPE,MODEL` output into whole disks.
pub fn parse_disks(json: &str) -> Result<Vec<DiskInfo>> {
    let disks = parse_devices(json)?
        .into_iter()
        .filter(|d| d.is_kind("disk"))
        .filter_map(|d| {
            let path = d.path()?;
            Some(DiskInfo {
                path,
                size: d.size(),
                model: d.model.as_deref().unwrap_or_default().trim().to_owned(),
            })
        })
        .collect();
    Ok(disks)
}

/// Parse `lsblk -J -o NAME,SIZE,TYPE,FSTYPE,LABEL,MOUNTPOINT` output into a
/// flat list of partitions. Containers (LUKS, LVM, ...) are walked but only
/// `part` nodes are returned.
pub fn parse_partitions(json: &str) -> Result<Vec<PartitionInfo>> {
    fn walk(devices: &[Device], out: &mut Vec<PartitionInfo>) {
        for dev in devices {
            if dev.is_kind("part") {
                if let Some(path) = dev.path() {
                    out.push(PartitionInfo {
                        path,
                        size: dev.size(),
                        fstype: dev.fstype.clone().unwrap_or_default(),
                        label: dev.label.clone().unwrap_or_default(),
                        mountpoint: dev.mountpoint.clone().unwrap_or_default(),
                    });
                }
            }
            if let Some(children) = dev.children.as_deref() {
                walk(children, out);
            }
        }
    }
    let devices = parse_devices(json)?;
    let mut out = Vec::new();
    walk(&devices, &mut out);
    Ok(out)
}

/// List the whole disks of the running system.
#[context("Listing disks")]
pub fn list_disks<E: Executor + ?Sized>(exec: &E) -> Result<Vec<DiskInfo>> {
    parse_disks(&lsblk(exec, DISK_COLUMNS)?)
}

/// List every partition of the running system.
#[context("Listing partitions")]
pub fn list_partitions<E: Executor + ?Sized>(exec: &E) -> Result<Vec<PartitionInfo>> {
    parse_partitions(&lsblk(exec, PARTITION_COLUMNS)?)
}

/// The prefix shared by the partitions of `disk`: `/dev/sda` → `/dev/sda`,
/// but `/dev/nvme0n1` → `/dev/nvme0n1p` and `/dev/mmcblk0` → `/dev/mmcblk0p`.
pub fn partition_prefix(disk: &str) -> String {
    if disk.contains("nvme") || disk.contains("mmcblk") {
        format!("{disk}p")
    } else {
        disk.to_owned()
    }
}

/// The device node of partition number `n` (starting at 1) on `disk`.
///
/// This predicts the name without asking the kernel, which is what is
/// needed right after rewriting a partition table.
pub fn partition_path(disk: &str, n: u32) -> String {
    format!("{}{n}", partition_prefix(disk))
}

/// Whether `path` names a partition of `disk`, i.e. it is the partition
/// prefix followed by a partition number. `/dev/sdaa1` is not on `/dev/sda`.
pub fn is_partition_of(disk: &str, path: &str) -> bool {
    let prefix = partition_prefix(disk);
    path.strip_prefix(prefix.as_str())
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Filter `parts` down to the partitions of `disk`, unmounted ones first.
pub fn partitions_of(disk: &str, parts: impl IntoIterator<Item = PartitionInfo>) -> Vec<PartitionInfo> {
    if disk.is_empty() {
        return Vec::new();
    }
    let mut parts = parts
        .into_iter()
        .filter(|p| is_partition_of(disk, &p.path))
        .collect::<Vec<_>>();
    parts.sort_by(|a, b| {
        (a.is_mounted(), &a.path).cmp(&(b.is_mounted(), &b.path))
    });
    parts
}

/// Parse a human readable lsblk size (e.g. `953.9G`, `512M`, `1.5TiB`) into
/// bytes, using binary multipliers. A comma is accepted as the decimal
/// separator. Returns 0 for anything unparsable.
pub fn parse_size_bytes(s: &str) -> u64 {
    static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^([0-9]+(?:[.,][0-9]+)?)\s*([KMGTP]?)(?:i?B)?$").unwrap()
    });
    let Some(caps) = SIZE_RE.captures(s.trim()) else {
        return 0;
    };
    let Ok(num) = caps[1].replace(',', ".").parse::<f64>() else {
        return 0;
    };
    let mul: u64 = match caps[2].to_ascii_uppercase().as_str() {
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        _ => 1,
    };
    (num * mul as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const LSBLK_DISKS: &str = indoc! { r#"
        {
           "blockdevices": [
              {"name":"loop0", "size":"2.3G", "type":"loop", "model":null},
              {"name":"sda", "size":"238.5G", "type":"disk", "model":"Samsung SSD 860  ",
                 "children": [
                    {"name":"sda1", "size":"512M", "type":"part", "model":null}
                 ]
              },
              {"name":"sr0", "size":"1024M", "type":"rom", "model":"DVD-RW"},
              {"name":"nvme0n1", "size":"953.9G", "type":"disk"}
           ]
        }
    "# };

    const LSBLK_PARTITIONS: &str = indoc! { r#"
        {
           "blockdevices": [
              {"name":"sda", "size":"238.5G", "type":"disk", "fstype":null, "label":null, "mountpoint":null,
                 "children": [
                    {"name":"sda1", "size":"512M", "type":"part", "fstype":"vfat", "label":"EFI", "mountpoint":"/boot/efi"},
                    {"name":"sda2", "size":"238G", "type":"part", "fstype":"crypto_LUKS", "label":null, "mountpoint":null,
                       "children": [
                          {"name":"luks-root", "size":"238G", "type":"crypt", "fstype":"ext4", "label":null, "mountpoint":"/"}
                       ]
                    }
                 ]
              },
              {"name":"nvme0n1", "size":953.9, "type":"disk",
                 "children": [
                    {"name":"nvme0n1p1", "size":1073741824, "type":"part", "fstype":"ext4", "label":"data", "mountpoint":null}
                 ]
              }
           ]
        }
    "# };

    #[test]
    fn test_parse_disks() {
        let disks = parse_disks(LSBLK_DISKS).unwrap();
        assert_eq!(
            disks,
            vec![
                DiskInfo {
                    path: "/dev/sda".into(),
                    size: "238.5G".into(),
                    model: "Samsung SSD 860".into(),
                },
                DiskInfo {
                    path: "/dev/nvme0n1".into(),
                    size: "953.9G".into(),
                    model: "".into(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_partitions_nested() {
        let parts = parse_partitions(LSBLK_PARTITIONS);
        // A fractional size is not something lsblk emits; make sure a bad
        // document is an error rather than a panic.
        assert!(parts.is_err());

        let fixed = LSBLK_PARTITIONS.replace("953.9,", "\"953.9G\",");
        let parts = parse_partitions(&fixed).unwrap();
        let paths = parts.iter().map(|p| p.path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, ["/dev/sda1", "/dev/sda2", "/dev/nvme0n1p1"]);
        assert_eq!(parts[0].fstype, "vfat");
        assert_eq!(parts[0].label, "EFI");
        assert!(parts[0].is_mounted());
        assert_eq!(parts[1].label, "");
        assert!(!parts[1].is_mounted());
        assert_eq!(parts[2].size, "1073741824");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_disks("{}").unwrap().is_empty());
        assert!(parse_partitions(r#"{"blockdevices": []}"#).unwrap().is_empty());
        assert!(parse_disks("not json").is_err());
    }

    #[test]
    fn test_partition_path() {
        let cases = [
            ("/dev/sda", 1, "/dev/sda1"),
            ("/dev/sda", 2, "/dev/sda2"),
            ("/dev/vdb", 3, "/dev/vdb3"),
            ("/dev/nvme0n1", 1, "/dev/nvme0n1p1"),
            ("/dev/nvme0n1", 2, "/dev/nvme0n1p2"),
            ("/dev/mmcblk0", 1, "/dev/mmcblk0p1"),
        ];
        for (disk, n, expected) in cases {
            assert_eq!(partition_path(disk, n), expected, "{disk} {n}");
        }
    }

    #[test]
    fn test_partitions_of() {
        let part = |path: &str, mountpoint: &str| PartitionInfo {
            path: path.into(),
            size: "1G".into(),
            fstype: "".into(),
            label: "".into(),
            mountpoint: mountpoint.into(),
        };
        let parts = vec![
            part("/dev/sda1", "/boot/efi"),
            part("/dev/sda2", ""),
            part("/dev/sdb1", ""),
            part("/dev/sdaa1", ""),
            part("/dev/nvme0n1p1", ""),
            part("/dev/nvme0n10p1", ""),
        ];
        let sda = partitions_of("/dev/sda", parts.clone());
        let paths = sda.iter().map(|p| p.path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, ["/dev/sda2", "/dev/sda1"]);
        let nvme = partitions_of("/dev/nvme0n1", parts.clone());
        assert_eq!(nvme.len(), 1);
        assert!(partitions_of("", parts).is_empty());

        assert!(is_partition_of("/dev/mmcblk0", "/dev/mmcblk0p12"));
        assert!(!is_partition_of("/dev/sda", "/dev/sda"));
        assert!(!is_partition_of("/dev/sda", "/dev/sdaa1"));
        assert!(!is_partition_of("/dev/nvme0n1", "/dev/nvme0n10p1"));
    }

    /// Answers every command with fixed lsblk output.
    struct FakeLsblk {
        stdout: &'static str,
        seen: std::cell::RefCell<Vec<Cmd>>,
    }

    impl Executor for FakeLsblk {
        fn dry_run(&self) -> bool {
            true
        }

        fn run(&self, cmd: Cmd) -> anyhow::Result<vistula_utils::CommandOutput> {
            self.seen.borrow_mut().push(cmd);
            Ok(vistula_utils::CommandOutput {
                stdout: self.stdout.into(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_list_disks_c_locale() -> Result<()> {
        let exec = FakeLsblk {
            stdout: LSBLK_DISKS,
            seen: Default::default(),
        };
        let disks = list_disks(&exec)?;
        assert_eq!(disks.len(), 2);
        let seen = exec.seen.borrow();
        assert_eq!(seen[0].argv(), ["lsblk", "-J", "-o", DISK_COLUMNS]);
        assert_eq!(seen[0].envs(), [("LC_ALL".to_owned(), "C".to_owned())]);
        assert!(seen[0].is_allowed_in_dry_run());
        Ok(())
    }

    #[test]
    fn test_parse_size_bytes() {
        let cases = [
            ("", 0),
            ("garbage", 0),
            ("512", 512),
            ("1K", 1024),
            ("512M", 512 * 1024 * 1024),
            ("1G", 1 << 30),
            ("1.5G", 3 << 29),
            ("2 TiB", 2 << 40),
            ("10gb", 10 << 30),
            ("1,5G", 3 << 29),
            ("1,2,3G", 0),
        ];
        for (s, v) in cases {
            assert_eq!(parse_size_bytes(s), v, "Parsing {s}");
        }
    }
}
