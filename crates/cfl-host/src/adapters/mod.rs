pub mod cre;
pub mod scripted;
pub mod traits;

pub use cre::{CreActor, CreConfig};
pub use scripted::ScriptedBackend;
pub use traits::{ExecutionBackend, ExecutionFailure, TicketReport};
