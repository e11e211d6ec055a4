//! Background loop turning kernel events into outbound responses.

use std::{sync::Arc, time::Duration};

use jupyter_bridge_kernel::{EventKind, ExecutionState, Kernel, KernelEvent};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    correlation::CorrelationTable,
    protocol::{flatten_mime_bundle, Response, StatusState},
    writer::OutputWriter,
};

pub struct EventRelay {
    kernel: Arc<dyn Kernel>,
    correlations: Arc<CorrelationTable>,
    writer: Arc<OutputWriter>,
    poll_interval: Duration,
}

impl EventRelay {
    pub fn new(
        kernel: Arc<dyn Kernel>,
        correlations: Arc<CorrelationTable>,
        writer: Arc<OutputWriter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kernel,
            correlations,
            writer,
            poll_interval,
        }
    }

    pub fn spawn(self, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancellation))
    }

    /// Relays events until `cancellation` fires. Poll failures are retried.
    pub async fn run(self, cancellation: CancellationToken) {
        debug!(poll_interval = ?self.poll_interval, "Event relay started");

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                polled = self.kernel.next_event(self.poll_interval) => polled,
            };

            match polled {
                Ok(Some(event)) => {
                    if cancellation.is_cancelled() {
                        break;
                    }
                    if let Some(response) = translate(event, &self.correlations) {
                        self.writer.emit(&response);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "Polling kernel events failed, retrying");
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        debug!("Event relay stopped");
    }
}

/// The response for `event`, or `None` for events that are filtered out.
pub fn translate(event: KernelEvent, correlations: &CorrelationTable) -> Option<Response> {
    let id = event
        .parent_id
        .as_deref()
        .and_then(|parent| correlations.resolve(parent));

    let response = match event.kind {
        EventKind::Stream { name, text } => Response::Stream { id, name, text },
        EventKind::ExecuteResult {
            execution_count,
            data,
        } => Response::ExecuteResult {
            id,
            execution_count,
            data: flatten_mime_bundle(data),
        },
        EventKind::DisplayData { data } => Response::DisplayData {
            id,
            data: flatten_mime_bundle(data),
        },
        EventKind::Error {
            ename,
            evalue,
            traceback,
        } => Response::Error {
            id,
            ename,
            evalue,
            traceback,
        },
        EventKind::Status { state } => {
            let state = match state {
                ExecutionState::Busy => StatusState::Busy,
                ExecutionState::Idle => StatusState::Idle,
                ExecutionState::Other(state) => {
                    trace!(state = %state, "Dropping status event");
                    return None;
                }
            };
            Response::Status { id, state }
        }
        EventKind::Unclassified { msg_type } => {
            trace!(msg_type = %msg_type, "Dropping unclassified event");
            return None;
        }
    };

    Some(response)
}
