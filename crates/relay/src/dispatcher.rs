//! Foreground loop reading requests from the parent process.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use jupyter_bridge_kernel::{ExecuteRequest, Kernel, KernelError};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    correlation::CorrelationTable,
    protocol::{Action, Request, RequestId, Response, StatusState},
    writer::OutputWriter,
};

/// Why the dispatcher stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Shutdown,
    EndOfInput,
    Cancelled,
}

pub struct CommandDispatcher {
    kernel: Arc<dyn Kernel>,
    correlations: Arc<CorrelationTable>,
    writer: Arc<OutputWriter>,
    restart_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        kernel: Arc<dyn Kernel>,
        correlations: Arc<CorrelationTable>,
        writer: Arc<OutputWriter>,
        restart_timeout: Duration,
    ) -> Self {
        Self {
            kernel,
            correlations,
            writer,
            restart_timeout,
        }
    }

    /// Reads and dispatches lines until a `shutdown` request, end of input,
    /// or cancellation.
    pub async fn run<R>(&self, mut input: R, cancellation: &CancellationToken) -> DispatchOutcome
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancellation.cancelled() => return DispatchOutcome::Cancelled,
                read = input.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => return DispatchOutcome::EndOfInput,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to read input, treating as closed");
                    return DispatchOutcome::EndOfInput;
                }
            }

            let Some(request) = std::str::from_utf8(&buf).ok().and_then(Request::parse) else {
                trace!("Ignoring blank or malformed line");
                continue;
            };

            // A request in flight is abandoned on cancellation, so a pending
            // restart neither delays teardown nor reports after it.
            let flow = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return DispatchOutcome::Cancelled,
                flow = self.dispatch(request) => flow,
            };
            if flow.is_break() {
                return DispatchOutcome::Shutdown;
            }
        }
    }

    pub async fn dispatch(&self, request: Request) -> ControlFlow<()> {
        let Request { id, action, code } = request;

        match action {
            Some(Action::Execute) => self.execute(id, code.unwrap_or_default()).await,
            Some(Action::Interrupt) => self.interrupt(id).await,
            Some(Action::Restart) => self.restart(id).await,
            Some(Action::Shutdown) => {
                info!(request_id = ?id, "Shutdown requested");
                return ControlFlow::Break(());
            }
            Some(Action::Unknown) | None => {
                trace!(request_id = ?id, "Ignoring request without a known action");
            }
        }

        ControlFlow::Continue(())
    }

    async fn execute(&self, id: Option<RequestId>, code: String) {
        let request = ExecuteRequest::new(code);
        // Registered before submission so no output can arrive unresolved.
        self.correlations.register(request.message_id(), id.clone());

        match self.kernel.execute(request).await {
            Ok(msg_id) => debug!(request_id = ?id, %msg_id, "Code submitted"),
            Err(e) => warn!(request_id = ?id, error = %e, "Failed to submit code"),
        }
    }

    async fn interrupt(&self, id: Option<RequestId>) {
        match self.kernel.interrupt().await {
            Ok(()) => debug!(request_id = ?id, "Kernel interrupted"),
            Err(e) => {
                warn!(request_id = ?id, error = %e, "Interrupt failed");
                self.writer
                    .emit(&Response::command_error(id, "InterruptError", e.to_string()));
            }
        }
    }

    async fn restart(&self, id: Option<RequestId>) {
        let restarted = time::timeout(self.restart_timeout, async {
            self.kernel.restart().await?;
            self.kernel.wait_for_ready(self.restart_timeout).await
        })
        .await
        .unwrap_or_else(|_| Err(KernelError::ReadyTimeout(self.restart_timeout)));

        let response = match restarted {
            Ok(()) => {
                info!(request_id = ?id, "Kernel restarted");
                Response::Status {
                    id,
                    state: StatusState::Restarted,
                }
            }
            Err(e) => {
                warn!(request_id = ?id, error = %e, "Restart failed");
                Response::command_error(id, "RestartError", e.to_string())
            }
        };

        self.writer.emit(&response);
    }
}
