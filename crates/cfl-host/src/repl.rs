//! Interactive consumer of the scheduler.
//!
//! The REPL actor owns one [`QueryDriver`] per running query. It steps a
//! query on submission and again whenever the scheduler reports that the
//! query's last outstanding ticket finished. Failures retire the query.

use std::collections::HashMap;

use cfl_expr::{CompoundExpr, ConsumerId, QueryId, ReportEntry, TicketId, TopLevelContext};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::driver::{QueryDriver, StepOutcome};
use crate::error::HostError;
use crate::ticketsrc::{QueryEvent, TicketFailure, TicketSrc};

#[derive(Debug)]
pub enum ReplMsg {
    Submit {
        ctx: TopLevelContext,
        resp: oneshot::Sender<QueryId>,
    },
    Shutdown,
}

/// What the REPL reports to its front end.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplEvent {
    TicketFinished {
        query: QueryId,
        ticket: TicketId,
        report: Vec<ReportEntry>,
    },
    QueryFinished {
        query: QueryId,
        result: CompoundExpr,
    },
    QueryFailed {
        query: QueryId,
        failure: TicketFailure,
    },
    /// Reduction raised an error; the query was dropped.
    QueryRejected {
        query: QueryId,
        error: String,
    },
}

impl ReplEvent {
    pub fn query(&self) -> QueryId {
        match self {
            ReplEvent::TicketFinished { query, .. }
            | ReplEvent::QueryFinished { query, .. }
            | ReplEvent::QueryFailed { query, .. }
            | ReplEvent::QueryRejected { query, .. } => *query,
        }
    }

    /// The query is over once this event is seen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReplEvent::TicketFinished { .. })
    }
}

/// Sending side of a running REPL.
#[derive(Debug, Clone)]
pub struct ReplHandle {
    tx: mpsc::Sender<ReplMsg>,
}

impl ReplHandle {
    pub async fn submit(&self, ctx: TopLevelContext) -> Result<QueryId, HostError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(ReplMsg::Submit { ctx, resp })
            .await
            .map_err(|_| HostError::ChannelClosed("repl control"))?;
        rx.await.map_err(|_| HostError::ChannelClosed("repl response"))
    }

    pub async fn shutdown(&self) -> Result<(), HostError> {
        self.tx
            .send(ReplMsg::Shutdown)
            .await
            .map_err(|_| HostError::ChannelClosed("repl control"))
    }
}

/// A spawned REPL: its handle, its event stream and its task.
pub struct ReplSession {
    pub handle: ReplHandle,
    pub events: mpsc::UnboundedReceiver<ReplEvent>,
    pub task: JoinHandle<()>,
}

pub struct Repl {
    consumer: ConsumerId,
    source: TicketSrc,
    drivers: HashMap<QueryId, QueryDriver>,
    control_rx: mpsc::Receiver<ReplMsg>,
    events_rx: mpsc::UnboundedReceiver<QueryEvent>,
    out_tx: mpsc::UnboundedSender<ReplEvent>,
}

impl Repl {
    /// Attach `consumer` to the scheduler and build the actor.
    pub fn new(
        consumer: ConsumerId,
        source: TicketSrc,
        control_rx: mpsc::Receiver<ReplMsg>,
        out_tx: mpsc::UnboundedSender<ReplEvent>,
    ) -> Self {
        let events_rx = source.attach(consumer);
        Self {
            consumer,
            source,
            drivers: HashMap::new(),
            control_rx,
            events_rx,
            out_tx,
        }
    }

    pub fn spawn(consumer: ConsumerId, source: TicketSrc, capacity: usize) -> ReplSession {
        let (tx, control_rx) = mpsc::channel(capacity);
        let (out_tx, events) = mpsc::unbounded_channel();
        let repl = Self::new(consumer, source, control_rx, out_tx);
        ReplSession {
            handle: ReplHandle { tx },
            events,
            task: tokio::spawn(repl.run()),
        }
    }

    pub async fn run(mut self) {
        tracing::info!("{} started", self.consumer);
        loop {
            tokio::select! {
                msg = self.control_rx.recv() => match msg {
                    Some(ReplMsg::Submit { ctx, resp }) => {
                        let query = self.submit(ctx);
                        let _ = resp.send(query);
                    }
                    Some(ReplMsg::Shutdown) | None => {
                        tracing::debug!("{} shutting down", self.consumer);
                        break;
                    }
                },
                event = self.events_rx.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        tracing::debug!("{} lost its mailbox", self.consumer);
                        break;
                    }
                },
            }
        }
        self.source.detach(self.consumer);
        tracing::info!(
            "{} stopped with {} running quer(ies)",
            self.consumer,
            self.drivers.len()
        );
    }

    /// Number of queries still running.
    pub fn running(&self) -> usize {
        self.drivers.len()
    }

    fn submit(&mut self, ctx: TopLevelContext) -> QueryId {
        let driver = QueryDriver::new(self.consumer, ctx, self.source.clone());
        let query = driver.query();
        tracing::debug!("{} submitted", query);
        self.drivers.insert(query, driver);
        self.step(query);
        query
    }

    fn step(&mut self, query: QueryId) {
        let Some(driver) = self.drivers.get_mut(&query) else {
            return;
        };
        match driver.step() {
            Ok(StepOutcome::Pending(_)) => {}
            // Retired once the failure event reaches this consumer.
            Ok(StepOutcome::Failed) => {}
            Ok(StepOutcome::Finished(result)) => {
                self.retire(query);
                self.emit(ReplEvent::QueryFinished { query, result });
            }
            Err(err) => {
                tracing::warn!("{query} rejected: {err}");
                self.retire(query);
                self.emit(ReplEvent::QueryRejected {
                    query,
                    error: err.to_string(),
                });
            }
        }
    }

    fn on_event(&mut self, event: QueryEvent) {
        match event {
            QueryEvent::TicketFinished {
                query,
                ticket,
                report,
            } => {
                if !self.drivers.contains_key(&query) {
                    return;
                }
                self.emit(ReplEvent::TicketFinished {
                    query,
                    ticket,
                    report,
                });
                if self.source.is_queue_clear(query) {
                    self.step(query);
                }
            }
            QueryEvent::QueryFailed { query, failure } => {
                if !self.drivers.contains_key(&query) {
                    return;
                }
                self.retire(query);
                self.emit(ReplEvent::QueryFailed { query, failure });
            }
        }
    }

    fn retire(&mut self, query: QueryId) {
        self.drivers.remove(&query);
        self.source.release_query(self.consumer, query);
    }

    fn emit(&self, event: ReplEvent) {
        if self.out_tx.send(event).is_err() {
            tracing::debug!("{} has no listener", self.consumer);
        }
    }
}
