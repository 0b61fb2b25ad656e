//! Test suite fixture.  Should only be used by this library.

use std::cell::RefCell;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use vistula_utils::{Cmd, CommandOutput, Executor};

/// Records every command instead of running it; all of them succeed with
/// empty output.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub(crate) cmds: RefCell<Vec<Cmd>>,
}

impl Executor for Recorder {
    fn dry_run(&self) -> bool {
        false
    }

    fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
        self.cmds.borrow_mut().push(cmd);
        Ok(CommandOutput::default())
    }
}

impl Recorder {
    /// The shell-quoted command lines seen so far.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.cmds.borrow().iter().map(|c| c.command_line()).collect()
    }
}

/// A temporary directory with a UTF-8 path.
pub(crate) fn tempdir() -> Result<(tempfile::TempDir, Utf8PathBuf)> {
    let td = tempfile::tempdir()?;
    let path = Utf8Path::from_path(td.path())
        .context("non-UTF-8 tempdir")?
        .to_owned();
    Ok((td, path))
}
