use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::traits::{ExecutionBackend, ExecutionFailure};
use crate::config::HostConfig;
use crate::ticketsrc::{BackendReply, TicketFailure, TicketReady};

#[derive(Debug, Clone)]
pub struct CreConfig {
    pub ticket_timeout: Duration,
}

impl Default for CreConfig {
    fn default() -> Self {
        Self {
            ticket_timeout: HostConfig::default().ticket_timeout,
        }
    }
}

impl From<&HostConfig> for CreConfig {
    fn from(config: &HostConfig) -> Self {
        Self {
            ticket_timeout: config.ticket_timeout,
        }
    }
}

/// Dispatcher between the scheduler and an [`ExecutionBackend`].
///
/// Every ready ticket runs in its own task under the configured timeout.
/// Errors and timeouts become failure replies; nothing is retried.
pub struct CreActor {
    backend: Arc<dyn ExecutionBackend>,
    config: CreConfig,
    ready_rx: mpsc::UnboundedReceiver<TicketReady>,
    reply_tx: mpsc::UnboundedSender<BackendReply>,
}

impl CreActor {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        config: CreConfig,
        ready_rx: mpsc::UnboundedReceiver<TicketReady>,
        reply_tx: mpsc::UnboundedSender<BackendReply>,
    ) -> Self {
        Self {
            backend,
            config,
            ready_rx,
            reply_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("execution dispatcher started ({})", self.backend.kind());
        while let Some(ready) = self.ready_rx.recv().await {
            let backend = Arc::clone(&self.backend);
            let reply_tx = self.reply_tx.clone();
            let limit = self.config.ticket_timeout;
            tokio::spawn(async move {
                let reply = execute(backend.as_ref(), ready, limit).await;
                if reply_tx.send(reply).is_err() {
                    tracing::debug!("ticket source gone; dropping reply");
                }
            });
        }
        tracing::info!("execution dispatcher stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn execute(backend: &dyn ExecutionBackend, ready: TicketReady, limit: Duration) -> BackendReply {
    let ticket = ready.ticket;
    tracing::debug!("executing {} for {}", ticket.id(), ready.query);
    let failure = |stdout: String, stderr: String| {
        BackendReply::Failed(TicketFailure {
            ticket: ticket.id(),
            lambda: ticket.lambda().name.clone(),
            script: ticket.script().to_string(),
            stdout,
            stderr,
        })
    };

    match timeout(limit, backend.execute(&ticket)).await {
        Ok(Ok(report)) => BackendReply::Finished {
            ticket: ticket.id(),
            outputs: report.outputs,
            report: report.report,
        },
        Ok(Err(err)) => match err.downcast_ref::<ExecutionFailure>() {
            Some(ExecutionFailure { stdout, stderr }) => failure(stdout.clone(), stderr.clone()),
            None => failure(String::new(), format!("{err:#}")),
        },
        Err(_) => failure(
            String::new(),
            format!("{} timed out after {:?}", backend.kind(), limit),
        ),
    }
}
