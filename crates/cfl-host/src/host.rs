use std::sync::Arc;

use cfl_expr::{ConsumerId, RunId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapters::{CreActor, CreConfig, ExecutionBackend};
use crate::config::HostConfig;
use crate::repl::{Repl, ReplSession};
use crate::ticketsrc::TicketSrc;

/// Scheduler plus execution dispatcher for one run.
///
/// `start` must be called inside a tokio runtime; both actors are spawned
/// immediately.
pub struct Host {
    source: TicketSrc,
    next_consumer: u64,
    tasks: Vec<JoinHandle<()>>,
}

impl Host {
    pub fn start(config: &HostConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        let run = config.resolve_run_id();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let source = TicketSrc::new(run, ready_tx);
        let actor = source.actor(reply_rx).spawn();
        let cre = CreActor::new(backend, CreConfig::from(config), ready_rx, reply_tx).spawn();
        tracing::info!("host started for {run}");

        Self {
            source,
            next_consumer: 1,
            tasks: vec![actor, cre],
        }
    }

    pub fn run_id(&self) -> RunId {
        self.source.run_id()
    }

    pub fn ticket_src(&self) -> &TicketSrc {
        &self.source
    }

    /// Spawn a REPL attached under a fresh consumer id.
    pub fn spawn_repl(&mut self) -> ReplSession {
        let consumer = ConsumerId(self.next_consumer);
        self.next_consumer += 1;
        Repl::spawn(consumer, self.source.clone(), 32)
    }

    /// Stop the dispatcher and the scheduler actor. Executions still in
    /// flight are abandoned.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("host stopped");
    }
}
