//! # Configuring the installed system
//!
//! Identity, time, keyboard, locale, network and the user account. File
//! contents are computed by pure functions; writes go through [`TargetRoot`].

use anyhow::Result;
use fn_error_context::context;
use vistula_utils::Executor;

use super::config::{NetworkSettings, Secret};
use crate::target::TargetRoot;

const ZONEINFO: &str = "usr/share/zoneinfo";
const LOCALE_GEN: &str = "etc/locale.gen";
const NM_CONNECTIONS: &str = "etc/NetworkManager/system-connections";

/// Run `script` with a login shell inside the target; the scripts used here
/// tolerate the tool being absent.
fn chroot_shell(exec: &dyn Executor, target: &TargetRoot, script: &str) -> Result<()> {
    exec.run(target.chroot("bash").args(["-lc", script]).unchecked())?;
    Ok(())
}

pub(crate) fn hosts_content(hostname: &str) -> String {
    format!("127.0.0.1\tlocalhost\n127.0.1.1\t{hostname}\n\n::1\tlocalhost ip6-localhost ip6-loopback\n")
}

pub(crate) fn keyboard_content(layout: &str) -> String {
    format!(
        "XKBLAYOUT=\"{layout}\"\nXKBMODEL=\"pc105\"\nXKBVARIANT=\"\"\nXKBOPTIONS=\"\"\nBACKSPACE=\"guess\"\n"
    )
}

/// Uncomment entries of `locale.gen`: every UTF-8 locale if `all`, otherwise
/// the lines mentioning `locale`. Other lines are kept byte for byte.
pub(crate) fn enable_locales(locale_gen: &str, locale: &str, all: bool) -> String {
    let wanted = |l: &str| {
        if all {
            l.contains(".UTF-8")
        } else {
            !locale.is_empty() && l.contains(locale)
        }
    };
    locale_gen
        .split_inclusive('\n')
        .map(|line| {
            let stripped = line.trim_start();
            match stripped.strip_prefix('#') {
                Some(rest) if wanted(stripped) => rest,
                _ => line,
            }
        })
        .collect()
}

/// File name of the connection profile for `ssid`.
pub(crate) fn wifi_profile_name(ssid: &str) -> String {
    format!("{}.nmconnection", ssid.replace('/', "_"))
}

/// A NetworkManager keyfile for a WPA-PSK (or, with an empty passphrase,
/// open) network.
pub(crate) fn wifi_profile(ssid: &str, passphrase: &str, uuid: &uuid::Uuid) -> String {
    let mut r = format!(
        "[connection]\nid={ssid}\nuuid={uuid}\ntype=wifi\nautoconnect=true\n\n\
         [wifi]\nssid={ssid}\nmode=infrastructure\n\n"
    );
    if !passphrase.is_empty() {
        r.push_str(&format!(
            "[wifi-security]\nkey-mgmt=wpa-psk\npsk={passphrase}\n\n"
        ));
    }
    r.push_str("[ipv4]\nmethod=auto\n\n[ipv6]\nmethod=auto\n");
    r
}

#[context("Configuring system")]
pub(crate) fn write_identity(target: &TargetRoot, hostname: &str) -> Result<()> {
    target.write("etc/hostname", &format!("{hostname}\n"))?;
    target.write("etc/hosts", &hosts_content(hostname))
}

#[context("Configuring timezone {tz}")]
pub(crate) fn configure_timezone(target: &TargetRoot, tz: &str) -> Result<()> {
    let valid = !tz.is_empty() && !tz.split('/').any(|c| c == ".." || c.is_empty());
    let zonefile = format!("{ZONEINFO}/{tz}");
    if valid && target.exists(&zonefile)? {
        target.symlink(&format!("../{zonefile}"), "etc/localtime")?;
    } else {
        tracing::warn!("Unknown timezone {tz:?}; not setting /etc/localtime");
    }
    target.write("etc/timezone", &format!("{tz}\n"))
}

#[context("Configuring keyboard")]
pub(crate) fn configure_keyboard(target: &TargetRoot, layout: &str) -> Result<()> {
    target.write("etc/default/keyboard", &keyboard_content(layout))
}

#[context("Configuring locale")]
pub(crate) fn configure_locale(
    exec: &dyn Executor,
    target: &TargetRoot,
    locale: &str,
    keymap: &str,
    all: bool,
) -> Result<()> {
    target.write("etc/locale.conf", &format!("LANG={locale}\n"))?;
    target.write("etc/vconsole.conf", &format!("KEYMAP={keymap}\n"))?;
    if !target.exists(LOCALE_GEN)? {
        tracing::debug!("No {LOCALE_GEN} in target");
        return Ok(());
    }
    let orig = target.read_to_string(LOCALE_GEN)?;
    target.write(LOCALE_GEN, &enable_locales(&orig, locale, all))?;
    chroot_shell(
        exec,
        target,
        "command -v locale-gen >/dev/null 2>&1 && locale-gen || true",
    )
}

#[context("Configuring network")]
pub(crate) fn configure_network(
    exec: &dyn Executor,
    target: &TargetRoot,
    net: &NetworkSettings,
) -> Result<()> {
    if net.enable_networkmanager {
        chroot_shell(
            exec,
            target,
            "command -v systemctl >/dev/null 2>&1 && systemctl enable NetworkManager || true",
        )?;
    }
    let ssid = net.wifi_ssid.trim();
    if ssid.is_empty() {
        return Ok(());
    }
    let profile = wifi_profile(ssid, net.wifi_passphrase.expose(), &uuid::Uuid::new_v4());
    let path = format!("{NM_CONNECTIONS}/{}", wifi_profile_name(ssid));
    target.write_private(&path, &profile)
}

#[context("Creating user {username}")]
pub(crate) fn create_user(
    exec: &dyn Executor,
    target: &TargetRoot,
    username: &str,
    password: &Secret,
) -> Result<()> {
    // May already exist in the copied system
    exec.run(
        target
            .chroot("useradd")
            .args(["-m", "-s", "/bin/bash", username])
            .unchecked(),
    )?;
    let input = format!("{username}:{}\n", password.expose());
    exec.run(target.chroot("chpasswd").stdin_text(input))?;
    Ok(())
}
