//! Kernel-side collaborator of the bridge: the [`Kernel`] interface the relay
//! drives, and a Jupyter implementation of it.

pub mod connection;
pub mod error;
pub mod jupyter;
pub mod kernel;
pub mod kernelspec;
pub mod message;
pub mod wire;

pub use error::{KernelError, WireError};
pub use jupyter::JupyterKernel;
pub use kernel::Kernel;
pub use message::{EventKind, ExecuteRequest, ExecutionState, KernelEvent, MessageId};
