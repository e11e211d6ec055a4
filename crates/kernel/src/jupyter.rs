//! [`Kernel`] implementation for Jupyter kernels reached over ZeroMQ.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::{
    process::{Child, Command},
    sync::{mpsc, Mutex},
    task::{self, JoinHandle},
    time::{self, sleep, Instant},
};
use tracing::{debug, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::{
    connection::{self, ConnectionFile, ConnectionInfo},
    error::{KernelError, WireError},
    kernel::Kernel,
    kernelspec::{self, InterruptMode, KernelSpec},
    message::{ExecuteRequest, JupyterMessage, KernelEvent, MessageId},
    wire::Session,
};

const EVENT_QUEUE_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const KERNEL_INFO_ATTEMPT: Duration = Duration::from_secs(1);
const IOPUB_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

struct Channels {
    session: Session,
    shell: DealerSocket,
    control: DealerSocket,
}

impl Channels {
    async fn send_shell(&mut self, message: &JupyterMessage) -> Result<(), KernelError> {
        let frames = self.session.encode(message)?;
        self.shell.send(into_zmq(frames)?).await?;
        Ok(())
    }

    async fn send_control(&mut self, message: &JupyterMessage) -> Result<(), KernelError> {
        let frames = self.session.encode(message)?;
        self.control.send(into_zmq(frames)?).await?;
        Ok(())
    }
}

struct Running {
    spec: KernelSpec,
    connection: ConnectionInfo,
    connection_file: ConnectionFile,
    session: Session,
    child: Child,
    iopub_reader: JoinHandle<()>,
}

pub struct JupyterKernel {
    kernel_name: String,
    spec: Option<KernelSpec>,
    runtime_dir: Option<PathBuf>,
    // Lock order: `running` before `channels`, never the reverse.
    running: Mutex<Option<Running>>,
    channels: Mutex<Option<Channels>>,
    event_sender: mpsc::Sender<KernelEvent>,
    event_receiver: Mutex<mpsc::Receiver<KernelEvent>>,
}

impl JupyterKernel {
    /// A kernel whose spec is looked up by name when started.
    pub fn new(kernel_name: impl Into<String>) -> Self {
        Self::build(kernel_name.into(), None)
    }

    pub fn with_spec(kernel_name: impl Into<String>, spec: KernelSpec) -> Self {
        Self::build(kernel_name.into(), Some(spec))
    }

    fn build(kernel_name: String, spec: Option<KernelSpec>) -> Self {
        let (event_sender, event_receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Self {
            kernel_name,
            spec,
            runtime_dir: None,
            running: Mutex::new(None),
            channels: Mutex::new(None),
            event_sender,
            event_receiver: Mutex::new(event_receiver),
        }
    }

    /// Writes connection files under `dir` instead of the Jupyter runtime dir.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    async fn ensure_alive(&self) -> Result<(), KernelError> {
        let mut running = self.running.lock().await;
        let running = running.as_mut().ok_or(KernelError::NotRunning)?;

        match running.child.try_wait()? {
            Some(status) => Err(KernelError::Died(status)),
            None => Ok(()),
        }
    }

    async fn kernel_info(&self, timeout: Duration) -> Result<Value, KernelError> {
        let mut channels = self.channels.lock().await;
        let channels = channels.as_mut().ok_or(KernelError::NotRunning)?;

        let request =
            JupyterMessage::new(channels.session.id(), "kernel_info_request", json!({}));
        channels.send_shell(&request).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let received = time::timeout_at(deadline, channels.shell.recv())
                .await
                .map_err(|_| KernelError::InfoTimeout(timeout))??;

            match channels.session.decode(received.into_vec()) {
                Ok(reply) if reply.parent_id() == Some(request.header.msg_id.as_str()) => {
                    return Ok(reply.content);
                }
                Ok(reply) => {
                    debug!(msg_type = reply.msg_type(), "Skipping unrelated shell reply");
                }
                Err(e) => warn!(error = %e, "Dropping undecodable shell reply"),
            }
        }
    }
}

#[async_trait]
impl Kernel for JupyterKernel {
    async fn start(&self) -> Result<(), KernelError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!(kernel = %self.kernel_name, "Kernel already started");
            return Ok(());
        }

        let spec = match &self.spec {
            Some(spec) => spec.clone(),
            None => kernelspec::find_kernel_spec(&self.kernel_name)?,
        };
        let connection = ConnectionInfo::allocate(&self.kernel_name)?;
        let runtime_dir = self
            .runtime_dir
            .clone()
            .unwrap_or_else(connection::runtime_dir);
        // Removed on drop, including when this future is dropped mid-launch.
        let connection_file = ConnectionFile::create(&connection, &runtime_dir)?;

        let (child, channels, iopub) =
            launch(&spec, &connection, connection_file.path()).await?;

        info!(
            kernel = %self.kernel_name,
            pid = ?child.id(),
            connection_file = %connection_file.path().display(),
            "Kernel started"
        );

        let session = channels.session.clone();
        let iopub_reader = task::spawn(read_iopub(
            iopub,
            session.clone(),
            self.event_sender.clone(),
        ));

        *self.channels.lock().await = Some(channels);
        *running = Some(Running {
            spec,
            connection,
            connection_file,
            session,
            child,
            iopub_reader,
        });

        Ok(())
    }

    async fn wait_for_ready(&self, timeout: Duration) -> Result<(), KernelError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.ensure_alive().await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(KernelError::ReadyTimeout(timeout));
            }

            match self.kernel_info(remaining.min(KERNEL_INFO_ATTEMPT)).await {
                Ok(_) => {
                    debug!(kernel = %self.kernel_name, "Kernel is ready");
                    return Ok(());
                }
                Err(KernelError::InfoTimeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn language(&self, timeout: Duration) -> Result<String, KernelError> {
        let content = self.kernel_info(timeout).await?;

        if let Some(name) = content
            .pointer("/language_info/name")
            .and_then(Value::as_str)
        {
            return Ok(name.to_string());
        }

        let running = self.running.lock().await;
        match running.as_ref().map(|running| running.spec.language.as_str()) {
            Some(language) if !language.is_empty() => Ok(language.to_string()),
            _ => Err(KernelError::Protocol(
                "kernel_info_reply has no language_info.name".to_string(),
            )),
        }
    }

    async fn next_event(&self, timeout: Duration) -> Result<Option<KernelEvent>, KernelError> {
        let mut events = self.event_receiver.lock().await;

        match time::timeout(timeout, events.recv()).await {
            Ok(event) => Ok(event),
            Err(_) => Ok(None),
        }
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<MessageId, KernelError> {
        let mut channels = self.channels.lock().await;
        let channels = channels.as_mut().ok_or(KernelError::NotRunning)?;

        let message_id = request.message_id().to_string();
        let message = request.into_message(channels.session.id());
        channels.send_shell(&message).await?;

        debug!(msg_id = %message_id, "Submitted execute_request");
        Ok(message_id)
    }

    async fn interrupt(&self) -> Result<(), KernelError> {
        let (mode, pid) = {
            let running = self.running.lock().await;
            let running = running.as_ref().ok_or(KernelError::NotRunning)?;
            (running.spec.interrupt_mode, running.child.id())
        };

        match mode {
            InterruptMode::Signal => send_sigint(pid),
            InterruptMode::Message => {
                let mut channels = self.channels.lock().await;
                let channels = channels.as_mut().ok_or(KernelError::NotRunning)?;
                let request =
                    JupyterMessage::new(channels.session.id(), "interrupt_request", json!({}));
                channels.send_control(&request).await
            }
        }
    }

    async fn restart(&self) -> Result<(), KernelError> {
        let mut running = self.running.lock().await;
        let running = running.as_mut().ok_or(KernelError::NotRunning)?;

        running.iopub_reader.abort();
        if let Err(e) = running.child.kill().await {
            warn!(error = %e, "Failed to kill kernel process for restart");
        }

        let (child, channels, iopub) = launch_with_session(
            &running.spec,
            &running.connection,
            running.connection_file.path(),
            running.session.clone(),
        )
        .await?;

        info!(kernel = %self.kernel_name, pid = ?child.id(), "Kernel restarted");

        running.child = child;
        running.iopub_reader = task::spawn(read_iopub(
            iopub,
            running.session.clone(),
            self.event_sender.clone(),
        ));
        *self.channels.lock().await = Some(channels);

        Ok(())
    }

    async fn shutdown(&self) -> Result<(), KernelError> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let channels = self.channels.lock().await.take();

        running.iopub_reader.abort();

        if let Some(mut channels) = channels {
            let request = JupyterMessage::new(
                channels.session.id(),
                "shutdown_request",
                json!({ "restart": false }),
            );
            match time::timeout(SHUTDOWN_GRACE, channels.send_control(&request)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Failed to send shutdown_request"),
                Err(_) => debug!("Timed out sending shutdown_request"),
            }
        }

        let killed = match time::timeout(SHUTDOWN_GRACE, running.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Kernel exited");
                Ok(())
            }
            _ => running.child.kill().await.map_err(KernelError::from),
        };

        // Dropping `running` removes the connection file.
        drop(running);
        info!(kernel = %self.kernel_name, "Kernel shut down");

        killed
    }
}

async fn launch(
    spec: &KernelSpec,
    connection: &ConnectionInfo,
    connection_file: &Path,
) -> Result<(Child, Channels, SubSocket), KernelError> {
    let session = Session::new(connection.key.as_bytes());
    launch_with_session(spec, connection, connection_file, session).await
}

async fn launch_with_session(
    spec: &KernelSpec,
    connection: &ConnectionInfo,
    connection_file: &Path,
    session: Session,
) -> Result<(Child, Channels, SubSocket), KernelError> {
    let mut child = spawn_process(spec, connection_file)?;
    let deadline = Instant::now() + CONNECT_TIMEOUT;

    let mut shell = DealerSocket::new();
    connect(&mut shell, &connection.endpoint(connection.shell_port), &mut child, deadline).await?;

    let mut control = DealerSocket::new();
    connect(&mut control, &connection.endpoint(connection.control_port), &mut child, deadline)
        .await?;

    let mut iopub = SubSocket::new();
    connect(&mut iopub, &connection.endpoint(connection.iopub_port), &mut child, deadline).await?;
    iopub.subscribe("").await?;

    let channels = Channels {
        session,
        shell,
        control,
    };

    Ok((child, channels, iopub))
}

fn spawn_process(spec: &KernelSpec, connection_file: &Path) -> Result<Child, KernelError> {
    let argv = spec.command_line(connection_file);
    let (program, args) = argv.split_first().ok_or_else(|| KernelError::InvalidSpec {
        path: spec.resource_dir.join("kernel.json"),
        reason: "argv is empty".to_string(),
    })?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        // stdout belongs to the protocol; kernel chatter goes to stderr.
        .stdout(io::stderr())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    // Keep terminal Ctrl-C away from the kernel; interrupts are explicit.
    #[cfg(unix)]
    command.process_group(0);

    debug!(?argv, "Spawning kernel process");

    command.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            KernelError::MissingDependency {
                program: program.clone(),
                source,
            }
        } else {
            KernelError::Spawn(source)
        }
    })
}

/// Connects `socket`, giving up if the kernel exits or the deadline passes
/// before it binds its ports.
async fn connect<S: Socket>(
    socket: &mut S,
    endpoint: &str,
    child: &mut Child,
    deadline: Instant,
) -> Result<(), KernelError> {
    loop {
        tokio::select! {
            connected = socket.connect(endpoint) => match connected {
                Ok(()) => return Ok(()),
                Err(e) => debug!(endpoint, error = %e, "Kernel not listening yet"),
            },
            status = child.wait() => return Err(KernelError::Died(status?)),
            _ = time::sleep_until(deadline) => {
                return Err(KernelError::ReadyTimeout(CONNECT_TIMEOUT));
            }
        }

        sleep(CONNECT_RETRY_INTERVAL).await;
    }
}

async fn read_iopub(mut socket: SubSocket, session: Session, events: mpsc::Sender<KernelEvent>) {
    loop {
        let frames = match socket.recv().await {
            Ok(message) => message.into_vec(),
            Err(e) => {
                warn!(error = %e, "IOPub receive failed");
                sleep(IOPUB_RETRY_INTERVAL).await;
                continue;
            }
        };

        match session.decode(frames) {
            Ok(message) => {
                let event = KernelEvent::from_message(&message);
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Dropping undecodable IOPub message"),
        }
    }
}

fn into_zmq(frames: Vec<Bytes>) -> Result<ZmqMessage, WireError> {
    let mut frames = frames.into_iter();
    let mut message = ZmqMessage::from(frames.next().ok_or(WireError::Empty)?);
    for frame in frames {
        message.push_back(frame);
    }
    Ok(message)
}

#[cfg(unix)]
fn send_sigint(pid: Option<u32>) -> Result<(), KernelError> {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    let pid = pid.ok_or(KernelError::NotRunning)?;
    let pid = i32::try_from(pid).map_err(|e| KernelError::Signal(e.to_string()))?;
    kill(Pid::from_raw(pid), Signal::SIGINT).map_err(|e| KernelError::Signal(e.to_string()))
}

#[cfg(not(unix))]
fn send_sigint(_pid: Option<u32>) -> Result<(), KernelError> {
    Err(KernelError::Signal(
        "signal interrupts are not supported on this platform".to_string(),
    ))
}
