//! Stable identifiers (PARTUUID/UUID) and filesystem types via `blkid`.

use std::collections::BTreeMap;
use std::fmt::Display;

use vistula_utils::{Cmd, Executor};

/// Which kind of stable identifier a device was resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// The GPT partition UUID; survives reformatting.
    PartUuid,
    /// The filesystem UUID.
    Uuid,
}

impl IdentifierKind {
    /// The `blkid`/fstab key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            IdentifierKind::PartUuid => "PARTUUID",
            IdentifierKind::Uuid => "UUID",
        }
    }
}

/// A stable reference to a partition; displays as e.g. `PARTUUID=abcd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentifier {
    /// The identifier kind.
    pub kind: IdentifierKind,
    /// The identifier value.
    pub value: String,
}

impl Display for DeviceIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.kind.key(), self.value)
    }
}

impl DeviceIdentifier {
    /// Pick the preferred identifier out of exported `blkid` metadata:
    /// PARTUUID first, then UUID.
    pub fn from_metadata(meta: &BTreeMap<String, String>) -> Option<Self> {
        [IdentifierKind::PartUuid, IdentifierKind::Uuid]
            .into_iter()
            .find_map(|kind| {
                meta.get(kind.key())
                    .filter(|v| !v.is_empty())
                    .map(|v| DeviceIdentifier {
                        kind,
                        value: v.clone(),
                    })
            })
    }
}

/// Resolves partitions to stable identifiers and filesystem types.
pub trait IdentifierResolver {
    /// The preferred stable identifier for `dev`, if one can be read.
    fn identifier(&self, dev: &str) -> Option<DeviceIdentifier>;

    /// The filesystem type of `dev`, or `fallback` if it can't be read
    /// (e.g. right after formatting, or in dry-run mode).
    fn filesystem_type(&self, dev: &str, fallback: &str) -> String;

    /// `dev` as it should appear in a persisted mount table: the stable
    /// identifier if available, otherwise the raw device path.
    fn device_ref(&self, dev: &str) -> String {
        self.identifier(dev)
            .map(|i| i.to_string())
            .unwrap_or_else(|| dev.to_owned())
    }
}

/// Parse the output of `blkid -o export`: one `KEY=VALUE` per line.
/// Lines without `=` are ignored; keys and values are trimmed.
pub fn parse_blkid_export(s: &str) -> BTreeMap<String, String> {
    s.lines()
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect()
}

/// An [`IdentifierResolver`] which queries `blkid` every time.
#[derive(Debug)]
pub struct BlkidResolver<'a, E: ?Sized> {
    exec: &'a E,
}

impl<'a, E: Executor + ?Sized> BlkidResolver<'a, E> {
    /// Create a resolver using `exec`; `blkid` is read-only so it also runs
    /// in dry-run mode.
    pub fn new(exec: &'a E) -> Self {
        Self { exec }
    }

    fn export(&self, dev: &str) -> BTreeMap<String, String> {
        let cmd = Cmd::new("blkid")
            .args(["-o", "export", dev])
            .allow_in_dry_run()
            .unchecked();
        match self.exec.run(cmd) {
            Ok(o) if o.success() => parse_blkid_export(&o.stdout),
            Ok(o) => {
                tracing::debug!("blkid {dev} exited with {}", o.code);
                BTreeMap::new()
            }
            Err(e) => {
                tracing::debug!("blkid {dev}: {e:#}");
                BTreeMap::new()
            }
        }
    }
}

impl<'a, E: Executor + ?Sized> IdentifierResolver for BlkidResolver<'a, E> {
    fn identifier(&self, dev: &str) -> Option<DeviceIdentifier> {
        DeviceIdentifier::from_metadata(&self.export(dev))
    }

    fn filesystem_type(&self, dev: &str, fallback: &str) -> String {
        self.export(dev)
            .remove("TYPE")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback.to_owned())
    }
}
