//! In-process backend answering tickets from registered closures.
//!
//! Used by tests and dry runs: every dispatch is recorded, so callers can
//! assert how often the scheduler actually handed a ticket out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use async_trait::async_trait;
use cfl_expr::{CompoundExpr, ReportEntry, Ticket, TicketId};
use serde_json::json;

use super::traits::{ExecutionBackend, ExecutionFailure, TicketReport};

type Handler = Box<dyn Fn(&Ticket) -> Result<Vec<CompoundExpr>, ExecutionFailure> + Send + Sync>;

pub struct ScriptedBackend {
    handlers: HashMap<String, Handler>,
    delay: Option<Duration>,
    dispatched: Mutex<Vec<TicketId>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            delay: None,
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Answer tickets of the foreign lambda named `lambda` with `handler`.
    pub fn on<F>(mut self, lambda: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Ticket) -> Result<Vec<CompoundExpr>, ExecutionFailure> + Send + Sync + 'static,
    {
        self.handlers.insert(lambda.into(), Box::new(handler));
        self
    }

    /// Hold every execution for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tickets handed to this backend, in dispatch order.
    pub fn dispatched(&self) -> Vec<TicketId> {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn kind(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, ticket: &Ticket) -> anyhow::Result<TicketReport> {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ticket.id());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let name = &ticket.lambda().name;
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| anyhow!("no script registered for lambda '{name}'"))?;
        let started = now_ms();
        let outputs = handler(ticket)?;

        let report = ReportEntry {
            timestamp_ms: started,
            run: ticket.run(),
            ticket: ticket.id(),
            lambda: name.clone(),
            key: "invoc-stat".into(),
            value: json!({ "backend": self.kind(), "outputs": outputs.len() }),
        };
        Ok(TicketReport {
            outputs,
            report: vec![report],
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
