//! IANA timezone names, from `zone1970.tab` or `timedatectl`.

use cap_std_ext::cap_std::fs::Dir;
use vistula_utils::{Cmd, Executor};

use super::{read_lossy, sorted_casefold};

const ZONE1970_TAB: &str = "usr/share/zoneinfo/zone1970.tab";

/// Parse `zone1970.tab`: tab separated, the third column is the zone name.
pub fn parse_zone_tab(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split('\t').nth(2))
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// IANA timezones known to the environment rooted at `root`, deduplicated and
/// sorted; falls back to `timedatectl list-timezones`.
pub fn list_timezones<E: Executor + ?Sized>(root: &Dir, exec: &E) -> Vec<String> {
    let mut zones = read_lossy(root, ZONE1970_TAB)
        .map(|s| parse_zone_tab(&s))
        .unwrap_or_default();
    if zones.is_empty() {
        let cmd = Cmd::new("timedatectl")
            .arg("list-timezones")
            .allow_in_dry_run()
            .unchecked();
        match exec.run(cmd) {
            Ok(o) if o.success() => {
                zones = o
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            }
            Ok(o) => tracing::debug!("timedatectl exited with {}", o.code),
            Err(e) => tracing::debug!("timedatectl: {e:#}"),
        }
    }
    sorted_casefold(zones)
}
