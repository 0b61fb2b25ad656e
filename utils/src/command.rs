//! Running external commands.
//!
//! Everything the installer does to a machine goes through an [`Executor`].
//! The default implementation, [`CommandRunner`], has a "dry run" mode in
//! which destructive commands are logged instead of executed; read-only
//! discovery commands opt in to running anyway via [`Cmd::allow_in_dry_run`].

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;

/// The exit code reported for an unchecked command which could not be spawned,
/// following the shell convention for "command not found".
pub const SPAWN_FAILED_CODE: i32 = 127;

/// A command line plus the policy for running it.
#[derive(Clone, PartialEq, Eq)]
pub struct Cmd {
    argv: Vec<String>,
    check: bool,
    cwd: Option<Utf8PathBuf>,
    env: Vec<(String, String)>,
    allow_in_dry_run: bool,
    stdin_text: Option<String>,
}

// Written by hand so that piped input (passwords) never ends up in logs.
impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmd")
            .field("argv", &self.argv)
            .field("check", &self.check)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("allow_in_dry_run", &self.allow_in_dry_run)
            .field("stdin_text", &self.stdin_text.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Cmd {
    /// Create a new command invoking `exe`. By default a non-zero exit is an
    /// error, and the command is simulated in dry-run mode.
    pub fn new(exe: impl Into<String>) -> Self {
        Self {
            argv: vec![exe.into()],
            check: true,
            cwd: None,
            env: Vec::new(),
            allow_in_dry_run: false,
            stdin_text: None,
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.argv.push(arg.as_ref().to_owned());
        self
    }

    /// Append arguments.
    pub fn args<S: AsRef<str>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.argv
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Tolerate a non-zero exit (or a failure to spawn); the caller
    /// inspects [`CommandOutput::code`] instead.
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    /// Run the command in the given working directory.
    pub fn cwd(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Execute this command even in dry-run mode; only for commands which
    /// do not modify the system.
    pub fn allow_in_dry_run(mut self) -> Self {
        self.allow_in_dry_run = true;
        self
    }

    /// Provide text on standard input. It is never logged.
    pub fn stdin_text(mut self, text: impl Into<String>) -> Self {
        self.stdin_text = Some(text.into());
        self
    }

    /// The program and its arguments.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Environment variables set for the command, in addition to the
    /// inherited environment.
    pub fn envs(&self) -> &[(String, String)] {
        &self.env
    }

    /// Whether a non-zero exit is an error.
    pub fn is_checked(&self) -> bool {
        self.check
    }

    /// Whether this command runs even in dry-run mode.
    pub fn is_allowed_in_dry_run(&self) -> bool {
        self.allow_in_dry_run
    }

    /// The command line quoted for a POSIX shell, as it appears in logs.
    pub fn command_line(&self) -> String {
        quote_argv(&self.argv)
    }
}

/// Quote an argument vector in a way that it would be parsed back by a
/// default POSIX shell. Arguments without shell meta-characters are left
/// untouched.
pub fn quote_argv<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '=' | ':' | ',' | '+' | '@' | '%'))
    {
        return arg.to_owned();
    }
    match shlex::try_quote(arg) {
        Ok(q) => q.into_owned(),
        // Only possible with an interior NUL, which can't be executed anyway
        Err(_) => format!("{arg:?}"),
    }
}

/// The captured result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `128 + N` if killed by signal N.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// A checked command exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
#[error("Command failed ({code}): {}{}", quote_argv(.argv), stderr_suffix(.stderr))]
pub struct CommandFailure {
    /// The program and its arguments.
    pub argv: Vec<String>,
    /// Exit code.
    pub code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Something that can run commands on behalf of the installer.
pub trait Executor {
    /// Whether destructive commands are simulated.
    fn dry_run(&self) -> bool;

    /// Run a command according to its policy.
    fn run(&self, cmd: Cmd) -> Result<CommandOutput>;
}

impl<T: Executor + ?Sized> Executor for &T {
    fn dry_run(&self) -> bool {
        (**self).dry_run()
    }

    fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
        (**self).run(cmd)
    }
}

/// Runs commands as child processes, capturing their output.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    dry_run: bool,
}

impl CommandRunner {
    /// Create a runner; in dry-run mode only commands marked with
    /// [`Cmd::allow_in_dry_run`] are executed.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl Executor for CommandRunner {
    fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
        let cmdline = cmd.command_line();
        if self.dry_run && !cmd.allow_in_dry_run {
            tracing::info!("[DRY-RUN] {cmdline}");
            return Ok(CommandOutput::default());
        }
        tracing::info!("$ {cmdline}");
        let output = match spawn_and_wait(&cmd) {
            Ok(o) => o,
            Err(e) if !cmd.check => {
                tracing::warn!("{e:#} (tolerated)");
                return Ok(CommandOutput {
                    code: SPAWN_FAILED_CODE,
                    stdout: String::new(),
                    stderr: format!("{e:#}"),
                });
            }
            Err(e) => return Err(e),
        };
        if !output.success() {
            if cmd.check {
                tracing::error!(
                    "Command failed ({}): {cmdline}\nSTDOUT:\n{}\nSTDERR:\n{}",
                    output.code,
                    output.stdout,
                    output.stderr
                );
                return Err(CommandFailure {
                    argv: cmd.argv,
                    code: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
                .into());
            }
            tracing::warn!("Command exited with {} (tolerated): {cmdline}", output.code);
        }
        Ok(output)
    }
}

fn exit_code(st: ExitStatus) -> i32 {
    st.code()
        .or_else(|| st.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

fn spawn_and_wait(cmd: &Cmd) -> Result<CommandOutput> {
    let (exe, args) = cmd
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("Empty command line"))?;
    let mut c = Command::new(exe);
    c.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(cwd) = cmd.cwd.as_deref() {
        c.current_dir(cwd);
    }
    c.envs(cmd.env.iter().map(|(k, v)| (k, v)));
    // Default to noninteractive
    if cmd.stdin_text.is_some() {
        c.stdin(Stdio::piped());
    } else {
        c.stdin(Stdio::null());
    }
    let mut child = c.spawn().with_context(|| format!("Spawning {exe}"))?;
    if let Some(text) = cmd.stdin_text.as_deref() {
        // Dropping the handle at the end of this block closes the pipe.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Missing stdin pipe for {exe}"))?;
        stdin
            .write_all(text.as_bytes())
            .with_context(|| format!("Writing input to {exe}"))?;
    }
    let o = child
        .wait_with_output()
        .with_context(|| format!("Executing {exe}"))?;
    Ok(CommandOutput {
        code: exit_code(o.status),
        stdout: String::from_utf8_lossy(&o.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&o.stderr).into_owned(),
    })
}
