use cfl_expr::{ConsumerId, ExprError, TicketEncodeError};
use thiserror::Error;

/// Fatal reduction failures. Cardinalities that are not derivable yet never
/// surface here; they leave the term residual instead.
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("{expr}: {source}")]
    NotBound { expr: String, source: ExprError },
    #[error("{expr}: parameter '{param}' is not bound")]
    ParamNotBound { expr: String, param: String },
    #[error("{expr}: correlated parameters differ in length ({lengths})")]
    CorrelationMismatch { expr: String, lengths: String },
    #[error("{expr}: channel {channel} exceeds output arity {arity}")]
    ChannelOutOfRange {
        expr: String,
        channel: usize,
        arity: usize,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{expr}: {message}")]
    Model { expr: String, message: String },
    #[error("ticket request rejected: {0}")]
    Ticket(#[from] TicketRequestError),
}

/// Invocation-contract violations reported by a ticket source. These are
/// programming errors and are never retried.
#[derive(Debug, Error)]
pub enum TicketRequestError {
    #[error("expected singular task expression in {expr}, found {count} values")]
    TaskNotSingular { expr: String, count: usize },
    #[error("cannot derive cardinality of task expression in {0}")]
    TaskNotDerivable(String),
    #[error("expected foreign lambda expression in {0}")]
    NotForeign(String),
    #[error("parameter '{param}' is not bound in {expr}")]
    ArgumentNotBound { expr: String, param: String },
    #[error("expected singular binding for '{param}' in {expr}, found {count} values")]
    ArgumentNotSingular {
        expr: String,
        param: String,
        count: usize,
    },
    #[error("cannot derive cardinality of parameter '{param}' in {expr}")]
    ArgumentNotDerivable { expr: String, param: String },
    #[error("parameter '{param}' in {expr} is bound to a {kind}; only string values reach the backend")]
    ArgumentNotLiteral {
        expr: String,
        param: String,
        kind: &'static str,
    },
    #[error("{0} is not attached to the ticket source")]
    UnknownConsumer(ConsumerId),
    #[error(transparent)]
    Encode(#[from] TicketEncodeError),
}
