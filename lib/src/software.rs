//! # Optional software selection
//!
//! Maps the bundles chosen by the user to distribution packages (installed
//! with `pacman`) and sandboxed application ids (installed with `flatpak`).
//! GUI applications are preferred as sandboxed apps.

use serde::{Deserialize, Serialize};

/// The "gamers" bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GamersBundle {
    /// Whether the bundle is selected at all.
    pub enabled: bool,
    /// Steam
    pub steam: bool,
    /// Lutris
    pub lutris: bool,
    /// Wine and winetricks
    pub wine: bool,
    /// MangoHud
    pub mangohud: bool,
    /// Feral GameMode
    pub gamemode: bool,
}

/// The "creators" bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CreatorsBundle {
    /// Whether the bundle is selected at all.
    pub enabled: bool,
    /// GIMP
    pub gimp: bool,
    /// Inkscape
    pub inkscape: bool,
    /// Blender
    pub blender: bool,
    /// Kdenlive
    pub kdenlive: bool,
    /// Audacity
    pub audacity: bool,
}

/// The "accountants" bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AccountantsBundle {
    /// Whether the bundle is selected at all.
    pub enabled: bool,
    /// LibreOffice
    pub libreoffice: bool,
    /// GnuCash
    pub gnucash: bool,
}

/// The "developers" bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DevelopersBundle {
    /// Whether the bundle is selected at all.
    pub enabled: bool,
    /// git
    pub git: bool,
    /// The base-devel group
    pub base_devel: bool,
    /// Python
    pub python: bool,
    /// Node.js and npm
    pub nodejs: bool,
    /// Visual Studio Code
    pub vscode: bool,
}

/// Everything the user picked on the software page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SoftwareSelection {
    /// Install the proprietary NVIDIA driver; independent of any bundle.
    pub nvidia_driver: bool,
    /// Additional sandboxed application ids, e.g. picked from a search.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_apps: Vec<String>,
    /// Gaming tools.
    pub gamers: GamersBundle,
    /// Graphics, video and audio editing.
    pub creators: CreatorsBundle,
    /// Office and finance.
    pub accountants: AccountantsBundle,
    /// Development tools.
    pub developers: DevelopersBundle,
}

/// What will actually be installed for a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallPlan {
    /// Distribution packages, in installation order.
    pub system_packages: Vec<String>,
    /// Sandboxed application ids, in installation order.
    pub sandboxed_apps: Vec<String>,
}

impl InstallPlan {
    /// Resolve a selection; explicitly requested apps come first.
    pub fn for_selection(sel: &SoftwareSelection) -> Self {
        let apps = sel
            .extra_apps
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .chain(sandboxed_apps_for(sel));
        Self {
            system_packages: system_packages_for(sel),
            sandboxed_apps: dedup(apps),
        }
    }

    /// Whether there is nothing to install.
    pub fn is_empty(&self) -> bool {
        self.system_packages.is_empty() && self.sandboxed_apps.is_empty()
    }
}

/// Keep the first occurrence of each item, preserving order.
fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|i| seen.insert(i.clone()))
        .collect()
}

fn when<'a>(cond: bool, items: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    items
        .iter()
        .filter(move |_| cond)
        .map(|s| (*s).to_owned())
}

/// Distribution packages for a selection.
pub fn system_packages_for(sel: &SoftwareSelection) -> Vec<String> {
    let g = &sel.gamers;
    let d = &sel.developers;
    let pkgs = when(
        sel.nvidia_driver,
        &["nvidia", "nvidia-utils", "lib32-nvidia-utils"],
    )
    .chain(when(g.enabled && g.wine, &["wine", "winetricks"]))
    .chain(when(g.enabled && g.mangohud, &["mangohud"]))
    .chain(when(g.enabled && g.gamemode, &["gamemode"]))
    .chain(when(d.enabled && d.git, &["git"]))
    .chain(when(d.enabled && d.base_devel, &["base-devel"]))
    .chain(when(d.enabled && d.python, &["python"]))
    .chain(when(d.enabled && d.nodejs, &["nodejs", "npm"]));
    dedup(pkgs)
}

/// Sandboxed application ids for a selection (not including
/// [`SoftwareSelection::extra_apps`]).
pub fn sandboxed_apps_for(sel: &SoftwareSelection) -> Vec<String> {
    let g = &sel.gamers;
    let c = &sel.creators;
    let a = &sel.accountants;
    let d = &sel.developers;
    let apps = when(g.enabled && g.steam, &["com.valvesoftware.Steam"])
        .chain(when(g.enabled && g.lutris, &["net.lutris.Lutris"]))
        .chain(when(c.enabled && c.gimp, &["org.gimp.GIMP"]))
        .chain(when(c.enabled && c.inkscape, &["org.inkscape.Inkscape"]))
        .chain(when(c.enabled && c.blender, &["org.blender.Blender"]))
        .chain(when(c.enabled && c.kdenlive, &["org.kde.kdenlive"]))
        .chain(when(c.enabled && c.audacity, &["org.audacityteam.Audacity"]))
        .chain(when(a.enabled && a.libreoffice, &["org.libreoffice.LibreOffice"]))
        .chain(when(a.enabled && a.gnucash, &["org.gnucash.GnuCash"]))
        .chain(when(d.enabled && d.vscode, &["com.visualstudio.code"]));
    dedup(apps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn everything() -> SoftwareSelection {
        SoftwareSelection {
            nvidia_driver: true,
            gamers: GamersBundle {
                enabled: true,
                steam: true,
                lutris: true,
                wine: true,
                mangohud: true,
                gamemode: true,
            },
            creators: CreatorsBundle {
                enabled: true,
                gimp: true,
                inkscape: true,
                blender: true,
                kdenlive: true,
                audacity: true,
            },
            accountants: AccountantsBundle {
                enabled: true,
                libreoffice: true,
                gnucash: true,
            },
            developers: DevelopersBundle {
                enabled: true,
                git: true,
                base_devel: true,
                python: true,
                nodejs: true,
                vscode: true,
            },
            extra_apps: Vec::new(),
        }
    }

    #[test]
    fn test_empty_selection() {
        let sel = SoftwareSelection::default();
        assert!(system_packages_for(&sel).is_empty());
        assert!(sandboxed_apps_for(&sel).is_empty());
        assert!(InstallPlan::for_selection(&sel).is_empty());
    }

    #[test]
    fn test_full_selection() {
        let sel = everything();
        assert_eq!(
            system_packages_for(&sel),
            [
                "nvidia",
                "nvidia-utils",
                "lib32-nvidia-utils",
                "wine",
                "winetricks",
                "mangohud",
                "gamemode",
                "git",
                "base-devel",
                "python",
                "nodejs",
                "npm"
            ]
        );
        assert_eq!(
            sandboxed_apps_for(&sel),
            [
                "com.valvesoftware.Steam",
                "net.lutris.Lutris",
                "org.gimp.GIMP",
                "org.inkscape.Inkscape",
                "org.blender.Blender",
                "org.kde.kdenlive",
                "org.audacityteam.Audacity",
                "org.libreoffice.LibreOffice",
                "org.gnucash.GnuCash",
                "com.visualstudio.code"
            ]
        );
        // Deterministic
        assert_eq!(system_packages_for(&sel), system_packages_for(&sel));
    }

    #[test]
    fn test_disabled_bundle_contributes_nothing() {
        let mut sel = everything();
        sel.nvidia_driver = false;
        sel.gamers.enabled = false;
        sel.creators.enabled = false;
        sel.accountants.enabled = false;
        sel.developers.enabled = false;
        assert!(system_packages_for(&sel).is_empty());
        assert!(sandboxed_apps_for(&sel).is_empty());

        // The driver has no parent bundle
        sel.nvidia_driver = true;
        assert_eq!(system_packages_for(&sel).len(), 3);
    }

    #[test]
    fn test_plan_extra_apps() {
        let mut sel = SoftwareSelection::default();
        sel.creators.enabled = true;
        sel.creators.gimp = true;
        sel.extra_apps = vec![
            "org.mozilla.firefox".into(),
            " ".into(),
            "org.gimp.GIMP".into(),
            "org.mozilla.firefox".into(),
        ];
        let plan = InstallPlan::for_selection(&sel);
        assert!(plan.system_packages.is_empty());
        assert_eq!(plan.sandboxed_apps, ["org.mozilla.firefox", "org.gimp.GIMP"]);
        assert!(!plan.is_empty());
    }
}
