//! Startup, steady state and teardown of one bridge session.

use std::{fmt, sync::Arc};

use jupyter_bridge_kernel::{Kernel, KernelError};
use tokio::{io::AsyncBufRead, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{BridgeConfig, DEFAULT_LANGUAGE},
    correlation::CorrelationTable,
    dispatcher::CommandDispatcher,
    protocol::Response,
    relay::EventRelay,
    writer::OutputWriter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Ready,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Graceful,
    StartupFailed,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Graceful => 0,
            ExitStatus::StartupFailed => 1,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Graceful => write!(f, "graceful"),
            ExitStatus::StartupFailed => write!(f, "startup failed"),
        }
    }
}

enum Startup {
    Started,
    Failed(KernelError),
    Cancelled,
}

/// Owns the kernel for a session and drives both loops over it.
pub struct Bridge {
    kernel: Arc<dyn Kernel>,
    writer: Arc<OutputWriter>,
    correlations: Arc<CorrelationTable>,
    config: BridgeConfig,
    cancellation: CancellationToken,
    state: LifecycleState,
}

impl Bridge {
    pub fn new(kernel: Arc<dyn Kernel>, writer: Arc<OutputWriter>, config: BridgeConfig) -> Self {
        let correlations = match config.correlation_capacity {
            Some(capacity) => CorrelationTable::with_capacity_limit(capacity),
            None => CorrelationTable::new(),
        };

        Self {
            kernel,
            writer,
            correlations: Arc::new(correlations),
            config,
            cancellation: CancellationToken::new(),
            state: LifecycleState::Starting,
        }
    }

    /// Token that stops the session when cancelled, e.g. from a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;
    }

    /// Runs the whole session, reading requests from `input` until shutdown.
    pub async fn run<R>(mut self, input: R) -> ExitStatus
    where
        R: AsyncBufRead + Unpin,
    {
        let startup = tokio::select! {
            result = self.start() => match result {
                Ok(()) => Startup::Started,
                Err(e) => Startup::Failed(e),
            },
            _ = self.cancellation.cancelled() => Startup::Cancelled,
        };

        match startup {
            Startup::Started => {}
            Startup::Failed(e) => {
                error!(error = %e, "Kernel startup failed");
                self.writer
                    .emit(&Response::startup_error(e.ename(), e.to_string()));
                self.writer.close();
                self.transition(LifecycleState::Stopped);
                return ExitStatus::StartupFailed;
            }
            Startup::Cancelled => {
                info!("Interrupted during startup");
                self.writer.close();
                self.teardown_kernel().await;
                self.transition(LifecycleState::Stopped);
                return ExitStatus::Graceful;
            }
        }

        self.transition(LifecycleState::Ready);
        let language = match self.kernel.language(self.config.kernel_info_timeout).await {
            Ok(language) => language,
            Err(e) => {
                debug!(error = %e, "Could not query kernel language, using default");
                DEFAULT_LANGUAGE.to_string()
            }
        };
        info!(%language, "Kernel ready");
        self.writer.emit(&Response::Ready { language });

        self.transition(LifecycleState::Running);
        let relay = EventRelay::new(
            Arc::clone(&self.kernel),
            Arc::clone(&self.correlations),
            Arc::clone(&self.writer),
            self.config.poll_interval,
        )
        .spawn(self.cancellation.clone());

        let dispatcher = CommandDispatcher::new(
            Arc::clone(&self.kernel),
            Arc::clone(&self.correlations),
            Arc::clone(&self.writer),
            self.config.restart_timeout,
        );
        let outcome = dispatcher.run(input, &self.cancellation).await;
        info!(?outcome, "Command loop finished");

        self.shutdown(relay).await;
        ExitStatus::Graceful
    }

    async fn start(&self) -> Result<(), KernelError> {
        self.kernel.start().await?;

        let ready_timeout = self.config.ready_timeout;
        let ready = time::timeout(ready_timeout, self.kernel.wait_for_ready(ready_timeout))
            .await
            .unwrap_or_else(|_| Err(KernelError::ReadyTimeout(ready_timeout)));

        if let Err(e) = ready {
            self.teardown_kernel().await;
            return Err(e);
        }

        Ok(())
    }

    async fn shutdown(&mut self, mut relay: JoinHandle<()>) {
        self.transition(LifecycleState::ShuttingDown);
        self.cancellation.cancel();
        self.writer.close();

        match time::timeout(self.config.teardown_timeout, &mut relay).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Event relay task failed"),
            Err(_) => {
                warn!("Event relay did not stop in time, aborting it");
                relay.abort();
            }
        }

        self.teardown_kernel().await;
        self.transition(LifecycleState::Stopped);
        info!("Bridge stopped");
    }

    // Errors here have nobody to be reported to.
    async fn teardown_kernel(&self) {
        match time::timeout(self.config.teardown_timeout, self.kernel.shutdown()).await {
            Ok(Ok(())) => debug!("Kernel shut down"),
            Ok(Err(e)) => debug!(error = %e, "Ignoring kernel shutdown error"),
            Err(_) => debug!("Kernel shutdown timed out"),
        }
    }
}
