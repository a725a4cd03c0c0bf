//! Term-rewriting reducer for dataflow expressions.
//!
//! The reducer walks a query's top-level context, resolves names, decides
//! conditionals, expands task applications and beta-reduces native lambdas.
//! Fully resolved foreign applications are handed to a [`TicketSource`], which
//! answers with a qualified ticket standing in for the eventual output.

mod combine;
mod error;
mod reducer;
mod source;

pub use error::{ReduceError, TicketRequestError};
pub use reducer::{Reducer, reduce_context};
pub use source::{TicketSource, foreign_task};
