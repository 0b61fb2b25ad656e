//! # Configuration for `vistula-installer install`
//!
//! This module handles the TOML configuration file describing one
//! installation. The password and Wi-Fi passphrase may be read from it but are
//! never written back out.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::{Deserialize, Serialize};

use crate::software::SoftwareSelection;

/// A password or passphrase. It is not serializable, and its `Debug` output
/// is redacted.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

impl Secret {
    /// Wrap a secret value.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The secret value itself; avoid logging it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no secret was given.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn chosen(p: &Option<Utf8PathBuf>) -> Option<&Utf8Path> {
    p.as_deref().filter(|p| !p.as_str().trim().is_empty())
}

/// Existing partitions to install onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ManualPartitions {
    /// The root partition (required).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Utf8PathBuf>,
    /// The EFI system partition; required on UEFI hosts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efi: Option<Utf8PathBuf>,
    /// A separate `/home`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<Utf8PathBuf>,
    /// A swap partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap: Option<Utf8PathBuf>,
    /// Create a fresh ext4 filesystem on the root partition.
    pub format_root: bool,
    /// Create a fresh FAT32 filesystem on the EFI partition.
    pub format_efi: bool,
    /// Create a fresh ext4 filesystem on the home partition.
    pub format_home: bool,
    /// Reinitialize the swap partition.
    pub format_swap: bool,
}

impl Default for ManualPartitions {
    fn default() -> Self {
        Self {
            root: None,
            efi: None,
            home: None,
            swap: None,
            format_root: true,
            format_efi: false,
            format_home: false,
            format_swap: false,
        }
    }
}

impl ManualPartitions {
    /// The root partition, if one was chosen.
    pub fn root(&self) -> Option<&Utf8Path> {
        chosen(&self.root)
    }

    /// The EFI system partition, if one was chosen.
    pub fn efi(&self) -> Option<&Utf8Path> {
        chosen(&self.efi)
    }

    /// The home partition, if one was chosen.
    pub fn home(&self) -> Option<&Utf8Path> {
        chosen(&self.home)
    }

    /// The swap partition, if one was chosen.
    pub fn swap(&self) -> Option<&Utf8Path> {
        chosen(&self.swap)
    }
}

/// How the target disk is prepared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum PartitionScheme {
    /// Wipe the disk and create a GPT with an EFI and a root partition.
    #[default]
    EraseDisk,
    /// Use existing partitions.
    Manual(ManualPartitions),
}

/// Network setup for the installed system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NetworkSettings {
    /// Enable the NetworkManager service.
    pub enable_networkmanager: bool,
    /// Write a Wi-Fi connection profile for this network, if non-empty.
    pub wifi_ssid: String,
    /// The Wi-Fi passphrase; empty for an open network.
    #[serde(skip_serializing)]
    pub wifi_passphrase: Secret,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            enable_networkmanager: true,
            wifi_ssid: String::new(),
            wifi_passphrase: Secret::default(),
        }
    }
}

/// Everything needed to perform one installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct InstallConfig {
    /// The whole disk to install to, e.g. `/dev/sda`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_disk: Option<Utf8PathBuf>,
    /// Hostname of the installed system.
    pub hostname: String,
    /// The user account to create.
    pub username: String,
    /// Password for that user.
    #[serde(skip_serializing)]
    pub password: Secret,
    /// e.g. `pl_PL.UTF-8`
    pub locale: String,
    /// Generate every UTF-8 locale instead of just [`Self::locale`].
    pub generate_all_locales: bool,
    /// XKB layout, also used as the console keymap.
    pub keyboard_layout: String,
    /// IANA timezone name.
    pub timezone: String,
    /// The EFI boot entry name.
    pub bootloader_id: String,
    /// Disk preparation.
    pub partitioning: PartitionScheme,
    /// Network setup.
    pub network: NetworkSettings,
    /// Optional software.
    pub software: SoftwareSelection,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            target_disk: None,
            hostname: "vistula".into(),
            username: "user".into(),
            password: Secret::default(),
            locale: "pl_PL.UTF-8".into(),
            generate_all_locales: false,
            keyboard_layout: "pl".into(),
            timezone: "Europe/Warsaw".into(),
            bootloader_id: "VistulaOS".into(),
            partitioning: PartitionScheme::default(),
            network: NetworkSettings::default(),
            software: SoftwareSelection::default(),
        }
    }
}

impl InstallConfig {
    /// The target disk, if one was chosen.
    pub fn target_disk(&self) -> Option<&Utf8Path> {
        chosen(&self.target_disk)
    }

    /// Serialize as TOML; secrets are omitted.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Serializing configuration")
    }
}

/// Parse a configuration, returning it along with any keys that were not
/// understood.
pub(crate) fn parse_config(buf: &str) -> Result<(InstallConfig, BTreeSet<String>)> {
    let mut unused = BTreeSet::new();
    let de = toml::Deserializer::new(buf);
    let c: InstallConfig = serde_ignored::deserialize(de, |path| {
        unused.insert(path.to_string());
    })?;
    Ok((c, unused))
}

#[context("Loading configuration")]
/// Load an installation configuration file. Unknown keys are warned about,
/// not rejected.
pub fn load_config(path: &Utf8Path) -> Result<InstallConfig> {
    let buf = std::fs::read_to_string(path).with_context(|| format!("Reading {path}"))?;
    let (config, unused) = parse_config(&buf).with_context(|| format!("Parsing {path}"))?;
    for key in unused {
        tracing::warn!("{path}: Unknown key {key}");
    }
    tracing::debug!("Loaded configuration: {config:?}");
    Ok(config)
}

#[context("Reading password from {path}")]
/// Read a password from the first line of a file.
pub fn read_password_file(path: &Utf8Path) -> Result<Secret> {
    let buf = std::fs::read_to_string(path)?;
    Ok(Secret::new(buf.lines().next().unwrap_or_default()))
}
