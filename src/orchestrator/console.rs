//! User-facing output shared between the orchestrator and session hooks

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A cloneable handle to where user-facing text goes (stdout by default).
///
/// Clones share one sink, so a clone can be installed as a session output
/// hook while the orchestrator keeps announcing through another.
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    /// Write to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write to `sink`.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Print one line. Failures are logged, not returned.
    pub fn say(&self, line: &str) {
        let mut this = self.clone();
        if let Err(e) = writeln!(this, "{}", line).and_then(|()| this.flush()) {
            tracing::debug!(error = %e, "console write failed");
        }
    }
}

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink
            .lock()
            .map_err(|_| io::Error::other("console lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink
            .lock()
            .map_err(|_| io::Error::other("console lock poisoned"))?
            .flush()
    }
}
