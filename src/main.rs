//! Jupyter bridge
//!
//! Runs one Jupyter kernel and relays it to the parent process as JSON lines:
//! requests arrive on stdin, kernel output and status leave on stdout.

mod tracing_init;

use std::{num::NonZeroUsize, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use jupyter_bridge_kernel::JupyterKernel;
use jupyter_bridge_relay::{detached_reader, Bridge, BridgeConfig, OutputWriter};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jupyter-bridge")]
#[command(version, about = "Relays a Jupyter kernel over JSON lines on stdin/stdout")]
struct Args {
    /// Kernelspec name of the kernel to launch
    #[arg(long, default_value = "python3", env = "JUPYTER_KERNEL_NAME")]
    kernel_name: String,

    /// Seconds to wait for the kernel to answer its first kernel_info request
    #[arg(long, default_value_t = 30, env = "JUPYTER_BRIDGE_READY_TIMEOUT")]
    ready_timeout_secs: u64,

    /// Seconds to wait for the kernel to become ready again after a restart
    #[arg(long, default_value_t = 30, env = "JUPYTER_BRIDGE_RESTART_TIMEOUT")]
    restart_timeout_secs: u64,

    /// Seconds to wait for the kernel language after startup
    #[arg(long, default_value_t = 10, env = "JUPYTER_BRIDGE_KERNEL_INFO_TIMEOUT")]
    kernel_info_timeout_secs: u64,

    /// Milliseconds the event relay waits per poll
    #[arg(long, default_value_t = 500, env = "JUPYTER_BRIDGE_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Seconds allowed for each teardown step at shutdown
    #[arg(long, default_value_t = 5, env = "JUPYTER_BRIDGE_TEARDOWN_TIMEOUT")]
    teardown_timeout_secs: u64,

    /// Keep at most this many request correlations, evicting the oldest
    #[arg(long, env = "JUPYTER_BRIDGE_CORRELATION_CAPACITY")]
    correlation_capacity: Option<NonZeroUsize>,

    /// Log level filter (e.g. "warn", "info", "debug"). `RUST_LOG` overrides it.
    #[arg(long, default_value = "warn", env = "JUPYTER_BRIDGE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "JUPYTER_BRIDGE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            restart_timeout: Duration::from_secs(self.restart_timeout_secs),
            kernel_info_timeout: Duration::from_secs(self.kernel_info_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            teardown_timeout: Duration::from_secs(self.teardown_timeout_secs),
            correlation_capacity: self.correlation_capacity,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    tracing_init::init_tracing(&args.log_level, args.log_json);

    let kernel = JupyterKernel::new(args.kernel_name.as_str());
    info!(kernel = %kernel.kernel_name(), "Starting bridge");

    let bridge = Bridge::new(
        Arc::new(kernel),
        Arc::new(OutputWriter::stdout()),
        args.bridge_config(),
    );
    spawn_signal_handler(bridge.cancellation_token())?;

    // tokio's stdin would keep the runtime alive on a pending read after a
    // signal, so stdin is read on a thread that is never joined.
    let input = detached_reader(std::io::stdin())?;
    let status = bridge.run(input).await;
    info!(%status, "Bridge exited");

    Ok(ExitCode::from(status.code()))
}

/// Cancels the session on Ctrl+C or, on unix, SIGTERM.
fn spawn_signal_handler(cancellation: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
            _ = sigterm_future => info!("Received SIGTERM shutdown signal"),
            _ = cancellation.cancelled() => return,
        }
        cancellation.cancel();
    });

    Ok(())
}
