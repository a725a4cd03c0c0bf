//! Runtime around the reducer: the ticket scheduler, execution-backend
//! dispatch, per-query drivers and the REPL consumer actor.

pub mod adapters;
pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod repl;
pub mod telemetry;
pub mod ticketsrc;

pub use adapters::{ExecutionBackend, ExecutionFailure, ScriptedBackend, TicketReport};
pub use config::HostConfig;
pub use driver::{QueryDriver, StepOutcome};
pub use error::HostError;
pub use host::Host;
pub use repl::{Repl, ReplEvent, ReplHandle, ReplSession};
pub use ticketsrc::{BackendReply, QueryEvent, TicketFailure, TicketReady, TicketSrc};
