//! Ticket scheduler.
//!
//! [`TicketSrc`] is the handle reducers call into: it validates and memoizes
//! ticket requests and hands fresh tickets to the execution backend.
//! [`TicketSrcActor`] consumes backend replies one at a time and propagates
//! completion or failure to the consumers tracking the affected queries.
//! Both share one mutex-guarded [`TicketTable`].

mod table;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use cfl_expr::{
    ApplyExpr, CompoundExpr, ConsumerId, QualifiedTicket, QueryId, ReportEntry, RunId, Ticket,
    TicketId,
};
use cfl_reduce::{TicketRequestError, TicketSource, foreign_task};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use table::{Deliveries, Requested, TicketTable};

/// A ticket ready for execution.
#[derive(Debug, Clone)]
pub struct TicketReady {
    /// Query whose request created the ticket.
    pub query: QueryId,
    pub ticket: Arc<Ticket>,
}

/// Everything known about a failed execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketFailure {
    pub ticket: TicketId,
    pub lambda: String,
    pub script: String,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of one execution, posted by the backend dispatcher.
#[derive(Debug, Clone)]
pub enum BackendReply {
    Finished {
        ticket: TicketId,
        outputs: Vec<CompoundExpr>,
        report: Vec<ReportEntry>,
    },
    Failed(TicketFailure),
}

/// Notification delivered to a consumer about one of its queries.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    TicketFinished {
        query: QueryId,
        ticket: TicketId,
        report: Vec<ReportEntry>,
    },
    QueryFailed {
        query: QueryId,
        failure: TicketFailure,
    },
}

impl QueryEvent {
    pub fn query(&self) -> QueryId {
        match self {
            QueryEvent::TicketFinished { query, .. } | QueryEvent::QueryFailed { query, .. } => {
                *query
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    table: TicketTable,
    mailboxes: HashMap<ConsumerId, mpsc::UnboundedSender<QueryEvent>>,
}

impl Shared {
    fn deliver(&mut self, deliveries: Deliveries) {
        for (consumer, event) in deliveries {
            let Some(mailbox) = self.mailboxes.get(&consumer) else {
                continue;
            };
            if mailbox.send(event).is_err() {
                tracing::debug!("{consumer} went away; detaching");
                self.mailboxes.remove(&consumer);
                self.table.detach(consumer);
            }
        }
    }
}

fn apply_reply(shared: &Mutex<Shared>, reply: BackendReply) {
    let mut shared = lock(shared);
    let deliveries = match reply {
        BackendReply::Finished {
            ticket,
            outputs,
            report,
        } => {
            tracing::debug!("{ticket} finished with {} output(s)", outputs.len());
            shared.table.finish(ticket, outputs, report)
        }
        BackendReply::Failed(failure) => {
            tracing::warn!(
                "{} ({}) failed: {}",
                failure.ticket,
                failure.lambda,
                failure.stderr.trim_end()
            );
            shared.table.fail(failure)
        }
    };
    shared.deliver(deliveries);
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle on the scheduler state.
#[derive(Debug, Clone)]
pub struct TicketSrc {
    shared: Arc<Mutex<Shared>>,
    cre_tx: mpsc::UnboundedSender<TicketReady>,
}

impl TicketSrc {
    /// Create the scheduler for `run`. Fresh tickets are sent to `cre_tx`.
    pub fn new(run: RunId, cre_tx: mpsc::UnboundedSender<TicketReady>) -> Self {
        tracing::debug!("ticket source for {run}");
        Self {
            shared: Arc::new(Mutex::new(Shared {
                table: TicketTable::new(run),
                mailboxes: HashMap::new(),
            })),
            cre_tx,
        }
    }

    pub fn run_id(&self) -> RunId {
        lock(&self.shared).table.run()
    }

    /// Register a consumer and return the receiving end of its mailbox.
    /// Attaching again replaces the previous mailbox.
    pub fn attach(&self, consumer: ConsumerId) -> mpsc::UnboundedReceiver<QueryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared).mailboxes.insert(consumer, tx);
        rx
    }

    pub fn detach(&self, consumer: ConsumerId) {
        let mut shared = lock(&self.shared);
        shared.mailboxes.remove(&consumer);
        shared.table.detach(consumer);
    }

    pub fn is_queue_clear(&self, query: QueryId) -> bool {
        lock(&self.shared).table.is_queue_clear(query)
    }

    /// A ticket the query depended on failed.
    pub fn is_failed(&self, query: QueryId) -> bool {
        lock(&self.shared).table.is_failed(query)
    }

    pub fn release_query(&self, consumer: ConsumerId, query: QueryId) {
        lock(&self.shared).table.release_query(consumer, query);
    }

    pub fn ticket_finished(
        &self,
        ticket: TicketId,
        outputs: Vec<CompoundExpr>,
        report: Vec<ReportEntry>,
    ) {
        apply_reply(
            &self.shared,
            BackendReply::Finished {
                ticket,
                outputs,
                report,
            },
        );
    }

    pub fn ticket_failed(&self, failure: TicketFailure) {
        apply_reply(&self.shared, BackendReply::Failed(failure));
    }

    /// Cached ticket for an identity, if any.
    pub fn cached(&self, ticket: &TicketId) -> Option<Arc<Ticket>> {
        lock(&self.shared).table.cached(ticket)
    }

    /// Actor applying backend replies to this scheduler.
    pub fn actor(&self, replies: mpsc::UnboundedReceiver<BackendReply>) -> TicketSrcActor {
        TicketSrcActor {
            source: Arc::clone(&self.shared),
            replies,
        }
    }
}

impl TicketSource for TicketSrc {
    fn request_ticket(
        &self,
        consumer: ConsumerId,
        query: QueryId,
        apply: &ApplyExpr,
    ) -> Result<QualifiedTicket, TicketRequestError> {
        let lambda = foreign_task(apply)?;
        let mut shared = lock(&self.shared);
        if !shared.mailboxes.contains_key(&consumer) {
            return Err(TicketRequestError::UnknownConsumer(consumer));
        }

        let bindings: BTreeMap<String, CompoundExpr> = apply
            .bindings
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let ticket = Ticket::new(shared.table.run(), lambda.clone(), bindings)?;
        let Requested { ticket, dispatch } = shared.table.request(consumer, query, ticket);

        if dispatch {
            tracing::debug!("{query} requests new {} ({})", ticket.id(), lambda.name);
            let ready = TicketReady {
                query,
                ticket: Arc::clone(&ticket),
            };
            if self.cre_tx.send(ready).is_err() {
                tracing::warn!("execution backend is gone; {} stays pending", ticket.id());
            }
        } else {
            tracing::trace!("{query} reuses {}", ticket.id());
        }

        Ok(QualifiedTicket {
            ticket: ticket.id(),
            channel: apply.channel,
            output: ticket.output_name(apply.channel).unwrap_or_default().to_string(),
        })
    }

    fn ticket_output(&self, ticket: &TicketId, channel: usize) -> Option<CompoundExpr> {
        lock(&self.shared).table.output(ticket, channel)
    }
}

/// Applies backend replies to the scheduler, one at a time, until every
/// reply sender is gone.
pub struct TicketSrcActor {
    source: Arc<Mutex<Shared>>,
    replies: mpsc::UnboundedReceiver<BackendReply>,
}

impl TicketSrcActor {
    pub async fn run(mut self) {
        while let Some(reply) = self.replies.recv().await {
            apply_reply(&self.source, reply);
        }
        tracing::debug!("ticket source actor stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
