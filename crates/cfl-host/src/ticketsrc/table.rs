//! Scheduler bookkeeping: ticket cache, result store and the query-ticket
//! relation. Pure state; delivering the resulting events is up to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cfl_expr::{CompoundExpr, ConsumerId, QueryId, ReportEntry, RunId, Ticket, TicketId};

use super::{QueryEvent, TicketFailure};

/// Events addressed to consumers, in delivery order.
pub type Deliveries = Vec<(ConsumerId, QueryEvent)>;

/// Result of registering a ticket request.
#[derive(Debug)]
pub struct Requested {
    pub ticket: Arc<Ticket>,
    /// Set when the ticket was not cached and must be handed to the backend.
    pub dispatch: bool,
}

#[derive(Debug)]
pub struct TicketTable {
    run: RunId,
    cache: HashMap<TicketId, Arc<Ticket>>,
    results: HashMap<TicketId, Vec<CompoundExpr>>,
    /// Outstanding tickets per query.
    query_tickets: HashMap<QueryId, HashSet<TicketId>>,
    /// Queries waiting on each outstanding ticket.
    ticket_queries: HashMap<TicketId, HashSet<QueryId>>,
    tracking: HashMap<ConsumerId, HashSet<QueryId>>,
    /// Queries ended by a failed ticket, kept until their consumers release them.
    failed: HashSet<QueryId>,
}

impl TicketTable {
    pub fn new(run: RunId) -> Self {
        Self {
            run,
            cache: HashMap::new(),
            results: HashMap::new(),
            query_tickets: HashMap::new(),
            ticket_queries: HashMap::new(),
            tracking: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    /// Register `query`'s interest in `ticket`, memoizing by identity.
    ///
    /// A cache hit returns the cached ticket; the dependency is only recorded
    /// while that ticket has not completed.
    pub fn request(&mut self, consumer: ConsumerId, query: QueryId, ticket: Ticket) -> Requested {
        self.tracking.entry(consumer).or_default().insert(query);
        let id = ticket.id();

        if let Some(cached) = self.cache.get(&id) {
            let cached = Arc::clone(cached);
            if !self.results.contains_key(&id) {
                self.add_dependency(query, id);
            }
            return Requested {
                ticket: cached,
                dispatch: false,
            };
        }

        let ticket = Arc::new(ticket);
        self.cache.insert(id, Arc::clone(&ticket));
        self.add_dependency(query, id);
        Requested {
            ticket,
            dispatch: true,
        }
    }

    fn add_dependency(&mut self, query: QueryId, ticket: TicketId) {
        self.query_tickets.entry(query).or_default().insert(ticket);
        self.ticket_queries.entry(ticket).or_default().insert(query);
    }

    /// Store a ticket's outputs and notify every query that waited on it.
    ///
    /// An output count that disagrees with the ticket's arity fails the ticket.
    pub fn finish(
        &mut self,
        ticket: TicketId,
        outputs: Vec<CompoundExpr>,
        report: Vec<ReportEntry>,
    ) -> Deliveries {
        let Some(cached) = self.cache.get(&ticket) else {
            tracing::warn!("ignoring completion of unknown {ticket}");
            return Vec::new();
        };
        if self.results.contains_key(&ticket) {
            tracing::warn!("ignoring repeated completion of {ticket}");
            return Vec::new();
        }
        if outputs.len() != cached.num_outputs() {
            let failure = TicketFailure {
                ticket,
                lambda: cached.lambda().name.clone(),
                script: cached.script().to_string(),
                stdout: String::new(),
                stderr: format!(
                    "expected {} output(s), backend returned {}",
                    cached.num_outputs(),
                    outputs.len()
                ),
            };
            return self.fail(failure);
        }

        self.results.insert(ticket, outputs);
        let mut deliveries = Vec::new();
        let mut waiting: Vec<QueryId> = self
            .ticket_queries
            .remove(&ticket)
            .unwrap_or_default()
            .into_iter()
            .collect();
        waiting.sort();
        for query in waiting {
            if let Some(outstanding) = self.query_tickets.get_mut(&query) {
                outstanding.remove(&ticket);
            }
            for consumer in self.trackers(query) {
                deliveries.push((
                    consumer,
                    QueryEvent::TicketFinished {
                        query,
                        ticket,
                        report: report.clone(),
                    },
                ));
            }
        }
        deliveries
    }

    /// Fail every query waiting on the ticket and evict it from the cache, so
    /// an identical request later dispatches afresh.
    pub fn fail(&mut self, failure: TicketFailure) -> Deliveries {
        let ticket = failure.ticket;
        if self.cache.remove(&ticket).is_none() {
            tracing::warn!("ignoring failure of unknown {ticket}");
            return Vec::new();
        }
        self.results.remove(&ticket);

        let mut waiting: Vec<QueryId> = self
            .ticket_queries
            .remove(&ticket)
            .unwrap_or_default()
            .into_iter()
            .collect();
        waiting.sort();

        let mut deliveries = Vec::new();
        for &query in &waiting {
            for consumer in self.trackers(query) {
                deliveries.push((
                    consumer,
                    QueryEvent::QueryFailed {
                        query,
                        failure: failure.clone(),
                    },
                ));
            }
        }
        for query in waiting {
            self.forget_query(&query);
            self.failed.insert(query);
        }
        deliveries
    }

    /// The query has no outstanding tickets and none of its tickets failed.
    pub fn is_queue_clear(&self, query: QueryId) -> bool {
        !self.failed.contains(&query)
            && self
                .query_tickets
                .get(&query)
                .is_none_or(|outstanding| outstanding.is_empty())
    }

    pub fn is_failed(&self, query: QueryId) -> bool {
        self.failed.contains(&query)
    }

    /// Stop tracking a retired query for `consumer`. Once nobody tracks it,
    /// its dependencies are dropped as well.
    pub fn release_query(&mut self, consumer: ConsumerId, query: QueryId) {
        if let Some(queries) = self.tracking.get_mut(&consumer) {
            queries.remove(&query);
        }
        if !self.tracking.values().any(|queries| queries.contains(&query)) {
            self.forget_query(&query);
            self.failed.remove(&query);
        }
    }

    /// Drop every trace of a consumer's interest.
    pub fn detach(&mut self, consumer: ConsumerId) {
        if let Some(queries) = self.tracking.remove(&consumer) {
            for query in queries {
                if !self.tracking.values().any(|other| other.contains(&query)) {
                    self.forget_query(&query);
                    self.failed.remove(&query);
                }
            }
        }
    }

    fn forget_query(&mut self, query: &QueryId) {
        if let Some(outstanding) = self.query_tickets.remove(query) {
            for ticket in outstanding {
                if let Some(dependents) = self.ticket_queries.get_mut(&ticket) {
                    dependents.remove(query);
                    if dependents.is_empty() {
                        self.ticket_queries.remove(&ticket);
                    }
                }
            }
        }
    }

    fn trackers(&self, query: QueryId) -> Vec<ConsumerId> {
        let mut consumers: Vec<ConsumerId> = self
            .tracking
            .iter()
            .filter(|(_, queries)| queries.contains(&query))
            .map(|(consumer, _)| *consumer)
            .collect();
        consumers.sort();
        consumers
    }

    /// Output `channel` (1-based) of a finished ticket.
    pub fn output(&self, ticket: &TicketId, channel: usize) -> Option<CompoundExpr> {
        let idx = channel.checked_sub(1)?;
        self.results.get(ticket)?.get(idx).cloned()
    }

    pub fn cached(&self, ticket: &TicketId) -> Option<Arc<Ticket>> {
        self.cache.get(ticket).cloned()
    }

    pub fn outstanding(&self, query: QueryId) -> usize {
        self.query_tickets.get(&query).map_or(0, HashSet::len)
    }

    pub fn num_cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cfl_expr::{ForeignLambda, Prototype};

    use super::*;

    fn ticket(run: RunId, x: &str) -> Ticket {
        let lambda = ForeignLambda::new(
            "wc",
            Prototype::new().with_param("x").with_output("n"),
            "bash",
            "wc -l $x > $n",
        );
        let mut bindings = BTreeMap::new();
        bindings.insert("x".to_string(), CompoundExpr::strs([x]));
        Ticket::new(run, lambda, bindings).unwrap()
    }

    fn failure(ticket: TicketId) -> TicketFailure {
        TicketFailure {
            ticket,
            lambda: "wc".into(),
            script: "wc -l $x > $n".into(),
            stdout: String::new(),
            stderr: "boom".into(),
        }
    }

    #[test]
    fn identical_requests_share_one_ticket() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let (q1, q2) = (QueryId::new(), QueryId::new());

        let first = table.request(ConsumerId(1), q1, ticket(run, "a.txt"));
        let second = table.request(ConsumerId(1), q2, ticket(run, "a.txt"));

        assert!(first.dispatch);
        assert!(!second.dispatch);
        assert!(Arc::ptr_eq(&first.ticket, &second.ticket));
        assert_eq!(table.num_cached(), 1);
        assert!(!table.is_queue_clear(q1));
        assert!(!table.is_queue_clear(q2));
    }

    #[test]
    fn finish_clears_queues_and_notifies_every_dependent() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let (q1, q2) = (QueryId::new(), QueryId::new());
        let id = table.request(ConsumerId(1), q1, ticket(run, "a")).ticket.id();
        table.request(ConsumerId(2), q2, ticket(run, "a"));

        let deliveries = table.finish(id, vec![CompoundExpr::strs(["3"])], Vec::new());

        assert_eq!(deliveries.len(), 2);
        assert!(table.is_queue_clear(q1));
        assert!(table.is_queue_clear(q2));
        assert_eq!(table.output(&id, 1), Some(CompoundExpr::strs(["3"])));
        assert_eq!(table.output(&id, 2), None);
    }

    #[test]
    fn hit_on_finished_ticket_records_no_dependency() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let id = table.request(ConsumerId(1), QueryId::new(), ticket(run, "a")).ticket.id();
        table.finish(id, vec![CompoundExpr::strs(["3"])], Vec::new());

        let late = QueryId::new();
        let hit = table.request(ConsumerId(1), late, ticket(run, "a"));
        assert!(!hit.dispatch);
        assert!(table.is_queue_clear(late));
    }

    #[test]
    fn failure_evicts_and_prunes_other_dependencies() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let query = QueryId::new();
        let bad = table.request(ConsumerId(1), query, ticket(run, "bad")).ticket.id();
        let other = table.request(ConsumerId(1), query, ticket(run, "ok")).ticket.id();

        let deliveries = table.fail(failure(bad));
        assert!(matches!(
            deliveries.as_slice(),
            [(ConsumerId(1), QueryEvent::QueryFailed { query: q, .. })] if *q == query
        ));
        assert!(table.cached(&bad).is_none());
        assert_eq!(table.outstanding(query), 0);

        // The other ticket finishes without anyone left to notify.
        assert!(table.finish(other, vec![CompoundExpr::strs(["1"])], Vec::new()).is_empty());

        let again = table.request(ConsumerId(1), QueryId::new(), ticket(run, "bad"));
        assert!(again.dispatch);
    }

    #[test]
    fn wrong_output_count_becomes_failure() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let query = QueryId::new();
        let id = table.request(ConsumerId(1), query, ticket(run, "a")).ticket.id();

        let deliveries = table.finish(id, Vec::new(), Vec::new());
        assert!(matches!(
            deliveries.as_slice(),
            [(_, QueryEvent::QueryFailed { failure, .. })] if failure.stderr.contains("expected 1")
        ));
        assert!(table.cached(&id).is_none());
    }

    #[test]
    fn unknown_tickets_are_ignored() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let stray = ticket(run, "never-requested").id();
        assert!(table.finish(stray, Vec::new(), Vec::new()).is_empty());
        assert!(table.fail(failure(stray)).is_empty());
    }

    #[test]
    fn released_query_is_no_longer_notified() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let query = QueryId::new();
        let id = table.request(ConsumerId(1), query, ticket(run, "a")).ticket.id();

        table.release_query(ConsumerId(1), query);
        assert!(table.is_queue_clear(query));
        assert!(table.finish(id, vec![CompoundExpr::strs(["1"])], Vec::new()).is_empty());
    }

    #[test]
    fn failed_query_never_reads_as_clear_until_released() {
        let run = RunId::new();
        let mut table = TicketTable::new(run);
        let query = QueryId::new();
        let done = table.request(ConsumerId(1), query, ticket(run, "done")).ticket.id();
        let bad = table.request(ConsumerId(1), query, ticket(run, "bad")).ticket.id();

        table.finish(done, vec![CompoundExpr::strs(["1"])], Vec::new());
        assert!(!table.is_queue_clear(query));
        table.fail(failure(bad));

        assert!(table.is_failed(query));
        assert!(!table.is_queue_clear(query));
        assert_eq!(table.outstanding(query), 0);

        table.release_query(ConsumerId(1), query);
        assert!(!table.is_failed(query));
    }
}
