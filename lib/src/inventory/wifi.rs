//! # Wi-Fi scanning
//!
//! Visible networks come from `nmcli`'s terse output. Scanning is best
//! effort; a missing `nmcli` or a failed scan yields no networks.

use vistula_utils::{Cmd, Executor};

/// A network seen in a Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network name.
    pub ssid: String,
    /// Signal strength in percent, if reported.
    pub signal: Option<u32>,
    /// e.g. `WPA2`; `None` for open networks.
    pub security: Option<String>,
}

/// Split one line of `nmcli -t` output into fields. Fields are separated by
/// `:`; a literal `:` or `\` inside a field is escaped with `\`.
pub fn split_terse_fields(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        // The vec is never empty
        let Some(cur) = fields.last_mut() else {
            break;
        };
        match c {
            '\\' => cur.push(chars.next().unwrap_or('\\')),
            ':' => fields.push(String::new()),
            c => cur.push(c),
        }
    }
    fields
}

/// Parse the output of `nmcli -t -f SSID,SIGNAL,SECURITY dev wifi list`.
/// Hidden (empty) and repeated SSIDs are dropped; the strongest networks
/// come first.
pub fn parse_wifi_list(s: &str) -> Vec<WifiNetwork> {
    let mut seen = std::collections::HashSet::new();
    let mut r = s
        .lines()
        .filter_map(|line| {
            let mut fields = split_terse_fields(line).into_iter();
            let ssid = fields.next()?.trim().to_owned();
            if ssid.is_empty() || !seen.insert(ssid.clone()) {
                return None;
            }
            let signal = fields.next().and_then(|s| s.trim().parse().ok());
            let security = fields
                .next()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty());
            Some(WifiNetwork {
                ssid,
                signal,
                security,
            })
        })
        .collect::<Vec<_>>();
    r.sort_by_cached_key(|n| {
        (
            std::cmp::Reverse(n.signal.unwrap_or_default()),
            n.ssid.to_lowercase(),
        )
    });
    r
}

/// Scan for Wi-Fi networks with NetworkManager. Returns an empty list if
/// `nmcli` is missing or the scan fails.
pub fn list_wifi_networks<E: Executor + ?Sized>(exec: &E) -> Vec<WifiNetwork> {
    let cmd = Cmd::new("nmcli")
        .args(["-t", "-f", "SSID,SIGNAL,SECURITY", "dev", "wifi", "list"])
        .args(["--rescan", "yes"])
        .allow_in_dry_run()
        .unchecked();
    match exec.run(cmd) {
        Ok(o) if o.success() => parse_wifi_list(&o.stdout),
        Ok(o) => {
            tracing::info!("Wi-Fi scan failed (exit {})", o.code);
            Vec::new()
        }
        Err(e) => {
            tracing::info!("Wi-Fi scan failed: {e:#}");
            Vec::new()
        }
    }
}
