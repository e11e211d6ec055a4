//! Relay core of the bridge: correlates asynchronous kernel output with the
//! requests that caused it and multiplexes it onto one outbound stream.

pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod input;
pub mod lifecycle;
pub mod protocol;
pub mod relay;
pub mod writer;

pub use config::BridgeConfig;
pub use correlation::CorrelationTable;
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use input::detached_reader;
pub use lifecycle::{Bridge, ExitStatus, LifecycleState};
pub use protocol::{Action, Request, RequestId, Response, StatusState};
pub use relay::EventRelay;
pub use writer::OutputWriter;
