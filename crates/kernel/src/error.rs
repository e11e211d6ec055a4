use std::{io, path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("kernel executable `{program}` not found: {source}")]
    MissingDependency { program: String, source: io::Error },
    #[error("no such kernel named {0}")]
    NoSuchKernel(String),
    #[error("invalid kernelspec at {}: {reason}", path.display())]
    InvalidSpec { path: PathBuf, reason: String },
    #[error("failed to spawn kernel process: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to write connection file {}: {source}", path.display())]
    ConnectionFile { path: PathBuf, source: io::Error },
    #[error("kernel didn't respond in {} seconds", .0.as_secs())]
    ReadyTimeout(Duration),
    #[error("kernel died before replying to kernel_info ({0})")]
    Died(ExitStatus),
    #[error("kernel_info reply not received within {} seconds", .0.as_secs())]
    InfoTimeout(Duration),
    #[error("kernel is not running")]
    NotRunning,
    #[error("unexpected reply from kernel: {0}")]
    Protocol(String),
    #[error("failed to signal kernel process: {0}")]
    Signal(String),
    #[error("channel error: {0}")]
    Channel(#[from] zeromq::ZmqError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl KernelError {
    /// Exception-style name reported to the parent when startup fails.
    pub fn ename(&self) -> &'static str {
        match self {
            KernelError::MissingDependency { .. } => "ImportError",
            KernelError::NoSuchKernel(_) => "NoSuchKernel",
            KernelError::InvalidSpec { .. } => "InvalidKernelSpec",
            KernelError::Spawn(_) => "SpawnError",
            KernelError::ConnectionFile { .. } => "ConnectionFileError",
            KernelError::ReadyTimeout(_) => "KernelTimeout",
            KernelError::Died(_) => "KernelDied",
            KernelError::InfoTimeout(_) => "TimeoutError",
            KernelError::NotRunning => "KernelNotRunning",
            KernelError::Protocol(_) => "ProtocolError",
            KernelError::Signal(_) => "SignalError",
            KernelError::Channel(_) => "ChannelError",
            KernelError::Wire(_) => "WireError",
            KernelError::Io(_) => "OSError",
        }
    }
}

#[derive(Error, Debug)]
pub enum WireError {
    #[error("missing <IDS|MSG> delimiter")]
    MissingDelimiter,
    #[error("expected at least {expected} frames after delimiter, got {actual}")]
    TooFewFrames { expected: usize, actual: usize },
    #[error("invalid message signature")]
    InvalidSignature,
    #[error("malformed message frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty multipart message")]
    Empty,
}
