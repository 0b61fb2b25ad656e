//! Console log output that steps around an active progress bar.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use indicatif::ProgressBar;
use tracing_subscriber::fmt::MakeWriter;

/// Writes log events to stderr. While a progress bar is attached it is
/// cleared for each event and redrawn below it.
#[derive(Clone, Default)]
pub(crate) struct Console {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("bar_attached", &self.active().is_some())
            .finish()
    }
}

impl Console {
    pub(crate) fn attach(&self, bar: &ProgressBar) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar.clone());
        }
    }

    pub(crate) fn detach(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = None;
        }
    }

    fn active(&self) -> Option<ProgressBar> {
        self.bar.lock().ok().and_then(|slot| slot.clone())
    }
}

/// The writer for a single log event.
pub(crate) struct ConsoleEvent {
    bar: Option<ProgressBar>,
}

impl fmt::Debug for ConsoleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleEvent")
            .field("bar_attached", &self.bar.is_some())
            .finish()
    }
}

impl Write for ConsoleEvent {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.bar.as_ref() {
            Some(bar) => bar.suspend(|| io::stderr().write(buf)),
            None => io::stderr().write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.bar.as_ref() {
            Some(bar) => bar.suspend(|| io::stderr().write_all(buf)),
            None => io::stderr().write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for Console {
    type Writer = ConsoleEvent;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleEvent { bar: self.active() }
    }
}
