use async_trait::async_trait;
use cfl_expr::{CompoundExpr, ReportEntry, Ticket};
use thiserror::Error;

/// What a successful execution hands back: one value per declared output, in
/// prototype order, plus diagnostic report entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketReport {
    pub outputs: Vec<CompoundExpr>,
    pub report: Vec<ReportEntry>,
}

/// Failed invocation with captured process output. Backends return it inside
/// their `anyhow::Error` so the dispatcher can report stdout and stderr.
#[derive(Debug, Clone, Default, Error)]
#[error("task exited unsuccessfully: {stderr}")]
pub struct ExecutionFailure {
    pub stdout: String,
    pub stderr: String,
}

/// Runs foreign tasks. Implementations are shared across concurrent executions.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> &str;
    async fn execute(&self, ticket: &Ticket) -> anyhow::Result<TicketReport>;
}
