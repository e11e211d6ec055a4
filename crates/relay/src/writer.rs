use std::{
    io::{self, Write},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, error, warn};

use crate::protocol::Response;

struct Sink {
    out: Box<dyn Write + Send>,
    closed: bool,
}

/// Serializes responses onto the outbound stream, one flushed line at a time.
///
/// Every writer in the process shares one instance, so whole lines never
/// interleave. Once closed, further responses are dropped.
pub struct OutputWriter {
    sink: Mutex<Sink>,
}

impl OutputWriter {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Sink {
                out: Box::new(out),
                closed: false,
            }),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn emit(&self, response: &Response) {
        // Serialize before taking the lock so it only covers the write.
        let line = match response.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                return;
            }
        };

        let mut sink = self.lock();
        if sink.closed {
            debug!("Output closed, dropping response");
            return;
        }
        if let Err(e) = sink.out.write_all(&line).and_then(|()| sink.out.flush()) {
            warn!(error = %e, "Failed to write response");
        }
    }

    /// Stops all further output. Returns once no emit is in progress.
    pub fn close(&self) {
        let mut sink = self.lock();
        sink.closed = true;
        if let Err(e) = sink.out.flush() {
            debug!(error = %e, "Failed to flush output on close");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Sink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
