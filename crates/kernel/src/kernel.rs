use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::KernelError,
    message::{ExecuteRequest, KernelEvent, MessageId},
};

/// A running interactive-execution kernel and its channels.
///
/// Implementations are shared between a foreground command loop and a
/// background event loop, so every operation takes `&self`.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Launches the kernel process and opens its channels.
    async fn start(&self) -> Result<(), KernelError>;

    /// Blocks until the kernel answers a `kernel_info_request`.
    async fn wait_for_ready(&self, timeout: Duration) -> Result<(), KernelError>;

    /// Name of the language the kernel executes.
    async fn language(&self, timeout: Duration) -> Result<String, KernelError>;

    /// Next event from the broadcast channel, or `None` if nothing arrived
    /// within `timeout`.
    async fn next_event(&self, timeout: Duration) -> Result<Option<KernelEvent>, KernelError>;

    /// Submits code for execution and returns the id its outputs will carry
    /// as their parent.
    async fn execute(&self, request: ExecuteRequest) -> Result<MessageId, KernelError>;

    async fn interrupt(&self) -> Result<(), KernelError>;

    /// Kills and relaunches the kernel process. Callers wait for readiness
    /// separately.
    async fn restart(&self) -> Result<(), KernelError>;

    async fn shutdown(&self) -> Result<(), KernelError>;
}
