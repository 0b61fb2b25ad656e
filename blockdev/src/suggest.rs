//! Default choices for manual partitioning.

use serde::Serialize;

use crate::{parse_size_bytes, PartitionInfo};

const FAT_TYPES: &[&str] = &["vfat", "fat", "fat16", "fat32"];
const LINUX_TYPES: &[&str] = &["ext4", "btrfs", "xfs", "f2fs", "ext3", "ext2"];

/// Suggested partition roles for a manual install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionSuggestion {
    /// Largest Linux (or unformatted) partition.
    pub root: Option<PartitionInfo>,
    /// Smallest FAT partition, only on UEFI hosts.
    pub efi: Option<PartitionInfo>,
    /// Second largest Linux (or unformatted) partition.
    pub home: Option<PartitionInfo>,
    /// Largest swap partition.
    pub swap: Option<PartitionInfo>,
}

fn fstype_of(p: &PartitionInfo) -> String {
    p.fstype.to_ascii_lowercase()
}

/// Pick default root/EFI/home/swap partitions out of `parts` (normally the
/// partitions of the chosen disk). Unmounted partitions are preferred; if
/// every partition is mounted, all of them are considered.
pub fn suggest_partitions(parts: &[PartitionInfo], efi_host: bool) -> PartitionSuggestion {
    let unmounted = parts.iter().filter(|p| !p.is_mounted()).collect::<Vec<_>>();
    let candidates = if unmounted.is_empty() {
        parts.iter().collect::<Vec<_>>()
    } else {
        unmounted
    };
    let size = |p: &&PartitionInfo| parse_size_bytes(&p.size);

    let efi = efi_host
        .then(|| {
            candidates
                .iter()
                .copied()
                .filter(|p| FAT_TYPES.contains(&fstype_of(p).as_str()))
                .min_by_key(size)
        })
        .flatten();
    let swap = candidates
        .iter()
        .copied()
        .filter(|p| fstype_of(p) == "swap")
        .max_by_key(size);

    let taken = [efi, swap]
        .into_iter()
        .flatten()
        .map(|p| p.path.as_str())
        .collect::<Vec<_>>();
    let mut linux = candidates
        .iter()
        .copied()
        .filter(|p| {
            let t = fstype_of(p);
            t.is_empty() || LINUX_TYPES.contains(&t.as_str())
        })
        .filter(|p| !taken.contains(&p.path.as_str()))
        .collect::<Vec<_>>();
    // Stable sort, so equal sizes keep device order
    linux.sort_by_key(|p| std::cmp::Reverse(parse_size_bytes(&p.size)));
    let mut linux = linux.into_iter();

    PartitionSuggestion {
        root: linux.next().cloned(),
        efi: efi.cloned(),
        home: linux.next().cloned(),
        swap: swap.cloned(),
    }
}

/// Whether a partition currently holding `current` should be formatted to
/// become `expected` (`ext4`, `vfat` or `swap`). An unknown current type is
/// left alone; a FAT variant counts as `vfat`.
pub fn wants_format(current: &str, expected: &str) -> bool {
    let current = current.trim().to_ascii_lowercase();
    if current.is_empty() {
        return false;
    }
    let expected = expected.to_ascii_lowercase();
    if expected == "vfat" {
        return !FAT_TYPES.contains(&current.as_str());
    }
    current != expected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(path: &str, size: &str, fstype: &str, mountpoint: &str) -> PartitionInfo {
        PartitionInfo {
            path: path.into(),
            size: size.into(),
            fstype: fstype.into(),
            label: String::new(),
            mountpoint: mountpoint.into(),
        }
    }

    #[test]
    fn test_suggest_typical_layout() {
        let parts = [
            part("/dev/sda1", "512M", "vfat", ""),
            part("/dev/sda2", "100G", "ext4", ""),
            part("/dev/sda3", "8G", "swap", ""),
            part("/dev/sda4", "300G", "", ""),
            part("/dev/sda5", "100M", "vfat", ""),
        ];
        let s = suggest_partitions(&parts, true);
        assert_eq!(s.efi.unwrap().path, "/dev/sda5");
        assert_eq!(s.swap.unwrap().path, "/dev/sda3");
        assert_eq!(s.root.unwrap().path, "/dev/sda4");
        assert_eq!(s.home.unwrap().path, "/dev/sda2");
    }

    #[test]
    fn test_suggest_bios_and_mounted() {
        let parts = [
            part("/dev/sda1", "512M", "vfat", "/boot/efi"),
            part("/dev/sda2", "100G", "ext4", "/"),
            part("/dev/sda3", "20G", "xfs", ""),
            part("/dev/sda4", "1T", "ntfs", ""),
        ];
        let s = suggest_partitions(&parts, false);
        assert!(s.efi.is_none());
        assert!(s.swap.is_none());
        // Mounted partitions are skipped while an unmounted candidate exists
        assert_eq!(s.root.unwrap().path, "/dev/sda3");
        assert!(s.home.is_none());
    }

    #[test]
    fn test_suggest_all_mounted() {
        let parts = [part("/dev/sdb1", "10G", "ext4", "/mnt")];
        let s = suggest_partitions(&parts, true);
        assert_eq!(s.root.unwrap().path, "/dev/sdb1");
        assert_eq!(suggest_partitions(&[], true), PartitionSuggestion::default());
    }

    #[test]
    fn test_wants_format() {
        let cases = [
            ("", "ext4", false),
            ("ext4", "ext4", false),
            ("EXT4", "ext4", false),
            ("xfs", "ext4", true),
            ("fat32", "vfat", false),
            ("vfat", "vfat", false),
            ("ext4", "vfat", true),
            ("swap", "swap", false),
            ("ext4", "swap", true),
        ];
        for (current, expected, want) in cases {
            assert_eq!(wants_format(current, expected), want, "{current} -> {expected}");
        }
    }
}
