//! # Mount table generation
//!
//! Builds the `/etc/fstab` of the installed system. Partitions are referenced
//! by PARTUUID (or UUID) when `blkid` can read one, so the table survives
//! device renumbering.

use camino::Utf8Path;
use vistula_blockdev::IdentifierResolver;

/// A single fstab line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTableEntry {
    /// `PARTUUID=...`, `UUID=...` or a device path.
    pub device_ref: String,
    /// Mount point, or `none` for swap.
    pub mountpoint: String,
    /// Filesystem type.
    pub fstype: String,
    /// Mount options.
    pub options: String,
    /// The dump field.
    pub dump: u32,
    /// The fsck pass number.
    pub pass: u32,
}

impl MountTableEntry {
    /// Render as a single line, without the trailing newline.
    pub fn to_fstab(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.device_ref, self.mountpoint, self.fstype, self.options, self.dump, self.pass
        )
    }
}

/// Compute the mount table entries for the given partitions, in the order
/// root, EFI, home, swap.
pub fn mount_table_entries(
    resolver: &dyn IdentifierResolver,
    root: &Utf8Path,
    efi: Option<&Utf8Path>,
    home: Option<&Utf8Path>,
    swap: Option<&Utf8Path>,
) -> Vec<MountTableEntry> {
    let entry = |dev: &Utf8Path, mountpoint: &str, fstype: String, options: &str, pass| {
        MountTableEntry {
            device_ref: resolver.device_ref(dev.as_str()),
            mountpoint: mountpoint.to_owned(),
            fstype,
            options: options.to_owned(),
            dump: 0,
            pass,
        }
    };
    let fstype = |dev: &Utf8Path, fallback: &str| resolver.filesystem_type(dev.as_str(), fallback);

    let mut r = vec![entry(root, "/", fstype(root, "ext4"), "defaults", 1)];
    if let Some(efi) = efi {
        r.push(entry(efi, "/boot/efi", fstype(efi, "vfat"), "umask=0077", 1));
    }
    if let Some(home) = home {
        r.push(entry(home, "/home", fstype(home, "ext4"), "defaults", 2));
    }
    if let Some(swap) = swap {
        r.push(entry(swap, "none", "swap".to_owned(), "sw", 0));
    }
    r
}

/// Build the text of `/etc/fstab`: one newline-terminated line per present
/// partition. This only queries `resolver` and has no other side effects.
pub fn build_mount_table(
    resolver: &dyn IdentifierResolver,
    root: &Utf8Path,
    efi: Option<&Utf8Path>,
    home: Option<&Utf8Path>,
    swap: Option<&Utf8Path>,
) -> String {
    mount_table_entries(resolver, root, efi, home, swap)
        .iter()
        .map(|e| format!("{}\n", e.to_fstab()))
        .collect()
}
