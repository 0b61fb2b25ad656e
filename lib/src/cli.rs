//! # Vistula OS installer CLI
//!
//! Command line front end for the installation engine and the discovery
//! helpers a graphical front end would use.

use std::ffi::OsString;
use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use clap::Parser;
use fn_error_context::context;
use serde::Serialize;
use vistula_blockdev::{PartitionInfo, PartitionSuggestion};
use vistula_utils::{CommandRunner, LogOptions};

use crate::console::Console;
use crate::install::config::{InstallConfig, PartitionScheme};
use crate::install::{Host, InstallationEngine};
use crate::software::InstallPlan;

/// Options for locating and amending an installation configuration.
#[derive(Debug, clap::Args)]
pub(crate) struct ConfigOpts {
    /// Path to the installation configuration (TOML).
    #[clap(long)]
    pub(crate) config: Utf8PathBuf,

    /// Install to this disk, overriding the configuration file.
    #[clap(long)]
    pub(crate) disk: Option<Utf8PathBuf>,

    /// Read the user's password from the first line of this file.
    #[clap(long)]
    pub(crate) password_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn load(&self) -> Result<InstallConfig> {
        let mut config = crate::install::config::load_config(&self.config)?;
        if let Some(disk) = self.disk.as_ref() {
            config.target_disk = Some(disk.clone());
        }
        if let Some(path) = self.password_file.as_deref() {
            config.password = crate::install::config::read_password_file(path)?;
        }
        Ok(config)
    }
}

/// Perform an installation
#[derive(Debug, Parser)]
pub(crate) struct InstallOpts {
    #[clap(flatten)]
    pub(crate) config_opts: ConfigOpts,

    /// Log the commands that would be run instead of running them.
    #[clap(long)]
    pub(crate) dry_run: bool,

    /// Do not ask for confirmation before erasing data.
    #[clap(long, short = 'y')]
    pub(crate) yes: bool,
}

/// Options for listing partitions
#[derive(Debug, Parser)]
pub(crate) struct PartitionsOpts {
    /// Only show partitions of this disk.
    #[clap(long)]
    pub(crate) disk: Option<String>,

    /// Output JSON.
    #[clap(long)]
    pub(crate) json: bool,
}

/// Install Vistula OS from the running live system.
///
/// Use `install --dry-run` to see every command an installation would run
/// without modifying the machine.
#[derive(Debug, Parser)]
#[clap(name = "vistula-installer", version)]
pub(crate) struct Cli {
    /// Enable verbose logging.
    #[clap(long, global = true)]
    pub(crate) debug: bool,

    /// Override the log file path.
    #[clap(long, global = true)]
    pub(crate) log_file: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    pub(crate) opt: Opt,
}

impl Cli {
    fn log_options(&self) -> LogOptions {
        LogOptions {
            debug: self.debug,
            log_file: self.log_file.clone(),
        }
    }
}

/// The installer's commands.
#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
pub(crate) enum Opt {
    /// Install to a disk as described by a configuration file.
    Install(InstallOpts),
    /// Check a configuration without installing.
    Validate(ConfigOpts),
    /// List the disks of this machine.
    Disks {
        /// Output JSON.
        #[clap(long)]
        json: bool,
    },
    /// List partitions.
    Partitions(PartitionsOpts),
    /// Suggest which partitions of a disk to use for a manual installation.
    SuggestPartitions {
        /// The disk to inspect.
        #[clap(long)]
        disk: String,
    },
    /// List the locales which can be configured.
    Locales {
        /// Include locales not using UTF-8.
        #[clap(long)]
        all: bool,
    },
    /// List known timezones.
    Timezones,
    /// List visible Wi-Fi networks.
    Wifi,
    /// Search for installable applications.
    SearchApps {
        /// Search terms.
        query: String,

        /// Show at most this many results.
        #[clap(long, default_value_t = crate::inventory::DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Show the mount table an installation would write.
    PreviewFstab(ConfigOpts),
    /// Show the software an installation would add.
    Plan {
        #[clap(flatten)]
        config_opts: ConfigOpts,

        /// Output JSON.
        #[clap(long)]
        json: bool,
    },
    /// Print the configuration as it was understood, without secrets.
    PrintConfig(ConfigOpts),
}

/// Discovery commands are read-only; anything else is only logged.
fn discovery_runner() -> CommandRunner {
    CommandRunner::new(true)
}

fn open_root() -> Result<Dir> {
    Dir::open_ambient_dir("/", cap_std::ambient_authority()).context("Opening /")
}

fn print_json(v: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, v)?;
    writeln!(stdout)?;
    Ok(())
}

fn new_table(header: &[&str]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table
        .load_preset(comfy_table::presets::NOTHING)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(header.iter().copied());
    table
}

fn describe_target(config: &InstallConfig) -> String {
    let disk = config
        .target_disk()
        .map(Utf8Path::as_str)
        .unwrap_or_default();
    match &config.partitioning {
        PartitionScheme::EraseDisk => format!("ALL DATA ON {disk} WILL BE ERASED"),
        PartitionScheme::Manual(m) => {
            let root = m.root().map(Utf8Path::as_str).unwrap_or_default();
            format!("Installing to {root} on {disk}")
        }
    }
}

#[context("Installing")]
async fn install(opts: InstallOpts, console: &Console) -> Result<()> {
    let config = opts.config_opts.load()?;
    let engine = InstallationEngine::new(CommandRunner::new(opts.dry_run), config)?;
    engine.validate()?;
    if !opts.dry_run && !opts.yes {
        let prompt = format!("{}. Continue?", describe_target(engine.config()));
        let answer = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .wait_for_newline(true)
            .interact()
            .context("prompting")?;
        if !answer {
            println!("Exiting without installing.");
            return Ok(());
        }
    }

    let pb = indicatif::ProgressBar::new(100);
    pb.set_style(indicatif::ProgressStyle::default_bar().template("{bar:40} {pos:>3}% {msg}")?);
    console.attach(&pb);
    let bar = pb.clone();
    let r = tokio::task::spawn_blocking(move || {
        engine.run_install(|ev| {
            bar.set_position(ev.percent.into());
            bar.set_message(ev.label);
        })
    })
    .await;
    pb.finish_and_clear();
    console.detach();
    r??;

    if opts.dry_run {
        println!("Dry run complete; no changes were made.");
    } else {
        println!("Installation complete. You may now reboot.");
    }
    Ok(())
}

fn firmware_name(host: &Host) -> &'static str {
    if host.efi {
        "UEFI"
    } else {
        "BIOS"
    }
}

fn validate(opts: ConfigOpts) -> Result<()> {
    let config = opts.load()?;
    let engine = InstallationEngine::new(discovery_runner(), config)?;
    engine.validate()?;
    println!("{}: OK ({} boot)", opts.config, firmware_name(engine.host()));
    Ok(())
}

fn disks(json: bool) -> Result<()> {
    let disks = vistula_blockdev::list_disks(&discovery_runner())?;
    if json {
        return print_json(&disks);
    }
    let mut table = new_table(&["DEVICE", "SIZE", "MODEL"]);
    for d in disks.iter() {
        table.add_row([d.path.as_str(), d.size.as_str(), d.model.as_str()]);
    }
    println!("{table}");
    Ok(())
}

fn partitions(opts: PartitionsOpts) -> Result<()> {
    let mut parts = vistula_blockdev::list_partitions(&discovery_runner())?;
    if let Some(disk) = opts.disk.as_deref() {
        parts = vistula_blockdev::partitions_of(disk, parts);
    }
    if opts.json {
        return print_json(&parts);
    }
    let mut table = new_table(&["DEVICE", "SIZE", "FSTYPE", "LABEL", "MOUNTPOINT"]);
    for p in parts.iter() {
        table.add_row([
            p.path.as_str(),
            p.size.as_str(),
            p.fstype.as_str(),
            p.label.as_str(),
            p.mountpoint.as_str(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn suggestion_rows(s: &PartitionSuggestion) -> Vec<[String; 4]> {
    let row = |role: &str, p: &Option<PartitionInfo>, expected: &str| {
        let (path, fstype, format) = match p {
            Some(p) => {
                let format = vistula_blockdev::wants_format(&p.fstype, expected);
                (p.path.clone(), p.fstype.clone(), format.to_string())
            }
            None => ("-".to_owned(), String::new(), String::new()),
        };
        [role.to_owned(), path, fstype, format]
    };
    vec![
        row("root", &s.root, "ext4"),
        row("efi", &s.efi, "vfat"),
        row("home", &s.home, "ext4"),
        row("swap", &s.swap, "swap"),
    ]
}

fn suggest_partitions(disk: &str) -> Result<()> {
    let host = Host::detect()?;
    let parts = vistula_blockdev::list_partitions(&discovery_runner())?;
    let parts = vistula_blockdev::partitions_of(disk, parts);
    let suggestion = vistula_blockdev::suggest_partitions(&parts, host.efi);
    let mut table = new_table(&["ROLE", "DEVICE", "FSTYPE", "FORMAT"]);
    for row in suggestion_rows(&suggestion) {
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}

fn print_lines(items: &[String]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for item in items {
        writeln!(stdout, "{item}")?;
    }
    Ok(())
}

fn wifi() -> Result<()> {
    let networks = crate::inventory::list_wifi_networks(&discovery_runner());
    let mut table = new_table(&["SSID", "SIGNAL", "SECURITY"]);
    for n in networks.iter() {
        let signal = n.signal.map(|s| s.to_string()).unwrap_or_default();
        let security = n.security.as_deref().unwrap_or_default();
        table.add_row([n.ssid.as_str(), signal.as_str(), security]);
    }
    println!("{table}");
    Ok(())
}

fn search_apps(query: &str, limit: usize) -> Result<()> {
    let apps = crate::inventory::search_apps(&discovery_runner(), query, limit);
    let mut table = new_table(&["APPLICATION", "NAME", "DESCRIPTION"]);
    for a in apps.iter() {
        table.add_row([a.id.as_str(), a.name.as_str(), a.description.as_str()]);
    }
    println!("{table}");
    Ok(())
}

fn preview_fstab(opts: ConfigOpts) -> Result<()> {
    let engine = InstallationEngine::new(discovery_runner(), opts.load()?)?;
    print!("{}", engine.planned_mount_table()?);
    Ok(())
}

fn plan(opts: ConfigOpts, json: bool) -> Result<()> {
    let plan = InstallPlan::for_selection(&opts.load()?.software);
    if json {
        return print_json(&plan);
    }
    if plan.is_empty() {
        println!("No optional software selected.");
        return Ok(());
    }
    println!("Packages: {}", plan.system_packages.join(" "));
    println!("Apps: {}", plan.sandboxed_apps.join(" "));
    Ok(())
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub async fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let console = Console::default();
    vistula_utils::initialize_tracing(&cli.log_options(), console.clone());
    tracing::trace!("starting");
    run_from_opt(cli.opt, &console).await
}

/// Internal (non-generic/monomorphized) primary CLI entrypoint
async fn run_from_opt(opt: Opt, console: &Console) -> Result<()> {
    match opt {
        Opt::Install(opts) => install(opts, console).await,
        Opt::Validate(opts) => validate(opts),
        Opt::Disks { json } => disks(json),
        Opt::Partitions(opts) => partitions(opts),
        Opt::SuggestPartitions { disk } => suggest_partitions(&disk),
        Opt::Locales { all } => {
            let locales = crate::inventory::list_locales(&open_root()?, &discovery_runner(), !all);
            print_lines(&locales)
        }
        Opt::Timezones => {
            let zones = crate::inventory::list_timezones(&open_root()?, &discovery_runner());
            print_lines(&zones)
        }
        Opt::Wifi => wifi(),
        Opt::SearchApps { query, limit } => search_apps(&query, limit),
        Opt::PreviewFstab(opts) => preview_fstab(opts),
        Opt::Plan { config_opts, json } => plan(config_opts, json),
        Opt::PrintConfig(opts) => {
            print!("{}", opts.load()?.to_toml_string()?);
            Ok(())
        }
    }
}

#[cfg(test)]
fn parse_opt<const N: usize>(args: [&str; N]) -> Result<Opt, clap::Error> {
    Cli::try_parse_from(args).map(|c| c.opt)
}

#[test]
fn test_parse_install_args() {
    let o = parse_opt([
        "vistula-installer",
        "install",
        "--config",
        "/etc/vistula/install.toml",
        "--dry-run",
        "--disk",
        "/dev/vda",
    ])
    .unwrap();
    let o = match o {
        Opt::Install(opts) => opts,
        o => panic!("Expected install opts, not {o:?}"),
    };
    assert!(o.dry_run);
    assert!(!o.yes);
    assert_eq!(o.config_opts.config.as_str(), "/etc/vistula/install.toml");
    assert_eq!(o.config_opts.disk.as_deref().map(Utf8Path::as_str), Some("/dev/vda"));
    assert!(o.config_opts.password_file.is_none());

    // A configuration is required
    assert!(parse_opt(["vistula-installer", "install"]).is_err());
}

#[test]
fn test_parse_discovery_args() {
    match parse_opt(["vistula-installer", "search-apps", "gimp"]).unwrap() {
        Opt::SearchApps { query, limit } => {
            assert_eq!(query, "gimp");
            assert_eq!(limit, crate::inventory::DEFAULT_SEARCH_LIMIT);
        }
        o => panic!("Unexpected {o:?}"),
    }
    match parse_opt(["vistula-installer", "partitions", "--disk", "/dev/sda", "--json"]).unwrap() {
        Opt::Partitions(o) => {
            assert_eq!(o.disk.as_deref(), Some("/dev/sda"));
            assert!(o.json);
        }
        o => panic!("Unexpected {o:?}"),
    }
}

#[test]
fn test_parse_logging_args() {
    let c = Cli::try_parse_from(["vistula-installer", "timezones"]).unwrap();
    let o = c.log_options();
    assert!(!o.debug);
    assert!(o.log_file.is_none());

    // Global flags are accepted after the subcommand too
    let c = Cli::try_parse_from([
        "vistula-installer",
        "--debug",
        "wifi",
        "--log-file",
        "/tmp/installer.log",
    ])
    .unwrap();
    assert!(matches!(c.opt, Opt::Wifi));
    let o = c.log_options();
    assert!(o.debug);
    assert_eq!(o.log_file.as_deref().map(Utf8Path::as_str), Some("/tmp/installer.log"));
}

#[test]
fn test_firmware_name() {
    let host = |efi| Host {
        efi,
        superuser: true,
        live_root: "/".into(),
    };
    assert_eq!(firmware_name(&host(true)), "UEFI");
    assert_eq!(firmware_name(&host(false)), "BIOS");
}

#[test]
fn test_config_overrides() -> Result<()> {
    let td = tempfile::tempdir()?;
    let dir = Utf8Path::from_path(td.path()).unwrap();
    let config = dir.join("install.toml");
    std::fs::write(&config, "target-disk = \"/dev/sda\"\nusername = \"ola\"\n")?;
    let pw = dir.join("pw");
    std::fs::write(&pw, "hunter2\n")?;
    let opts = ConfigOpts {
        config,
        disk: Some("/dev/vdb".into()),
        password_file: Some(pw),
    };
    let c = opts.load()?;
    assert_eq!(c.target_disk().unwrap().as_str(), "/dev/vdb");
    assert_eq!(c.username, "ola");
    assert_eq!(c.password.expose(), "hunter2");
    assert_eq!(describe_target(&c), "ALL DATA ON /dev/vdb WILL BE ERASED");
    Ok(())
}

#[test]
fn test_suggestion_rows() {
    let p = |path: &str, fstype: &str| PartitionInfo {
        path: path.into(),
        size: "10G".into(),
        fstype: fstype.into(),
        label: String::new(),
        mountpoint: String::new(),
    };
    let s = PartitionSuggestion {
        root: Some(p("/dev/sda2", "btrfs")),
        efi: Some(p("/dev/sda1", "vfat")),
        home: None,
        swap: Some(p("/dev/sda3", "")),
    };
    let rows = suggestion_rows(&s);
    assert_eq!(rows[0], ["root", "/dev/sda2", "btrfs", "true"]);
    assert_eq!(rows[1], ["efi", "/dev/sda1", "vfat", "false"]);
    assert_eq!(rows[2], ["home", "-", "", ""]);
    assert_eq!(rows[3], ["swap", "/dev/sda3", "", "false"]);
}
