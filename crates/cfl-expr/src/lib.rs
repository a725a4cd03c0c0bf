//! Expression model for the dataflow language: compound expressions, binding
//! blocks held in an arena, task prototypes, lambdas and content-addressed tickets.

mod block;
mod context;
mod error;
mod expr;
mod ids;
mod lambda;
mod report;
mod ticket;

pub use block::{Block, BlockArena, BlockId};
pub use context::TopLevelContext;
pub use error::{ExprError, TicketEncodeError};
pub use expr::{ApplyExpr, Bindings, CompoundExpr, CondExpr, CurryExpr, Expr, QualifiedTicket};
pub use ids::{ConsumerId, QueryId, RunId, TicketId};
pub use lambda::{ForeignLambda, LABEL_TASK, Lambda, NativeLambda, Param, Prototype};
pub use report::ReportEntry;
pub use ticket::Ticket;
