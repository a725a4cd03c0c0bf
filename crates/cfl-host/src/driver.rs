use cfl_expr::{CompoundExpr, ConsumerId, QueryId, TopLevelContext};
use cfl_reduce::{ReduceError, reduce_context};

use crate::ticketsrc::TicketSrc;

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No outstanding tickets remain; the query's result.
    Finished(CompoundExpr),
    /// Still waiting on tickets; the partially reduced expression so far.
    Pending(CompoundExpr),
    /// A ticket the query depended on failed. The query is not reduced any
    /// further; its failure is reported through the consumer's mailbox.
    Failed,
}

/// Advances one query by reduction passes over its top-level context.
pub struct QueryDriver {
    query: QueryId,
    consumer: ConsumerId,
    ctx: TopLevelContext,
    source: TicketSrc,
}

impl QueryDriver {
    pub fn new(consumer: ConsumerId, ctx: TopLevelContext, source: TicketSrc) -> Self {
        Self {
            query: QueryId::new(),
            consumer,
            ctx,
            source,
        }
    }

    pub fn query(&self) -> QueryId {
        self.query
    }

    pub fn current_expr(&self) -> CompoundExpr {
        self.ctx.current_expr()
    }

    /// Reduce the context once and report whether the query is done.
    ///
    /// A query is only finished when its queue is clear and no qualified
    /// ticket is left anywhere in the result. A ticket may complete between
    /// the reduction and the queue check; its placeholder is then substituted
    /// by one more pass.
    pub fn step(&mut self) -> Result<StepOutcome, ReduceError> {
        if self.source.is_failed(self.query) {
            return Ok(StepOutcome::Failed);
        }
        let mut result = self.reduce()?;
        if !self.source.is_queue_clear(self.query) {
            return Ok(self.pending(result));
        }
        if self.ctx.arena().holds_ticket(&result) {
            result = self.reduce()?;
            if !self.source.is_queue_clear(self.query) || self.ctx.arena().holds_ticket(&result) {
                return Ok(self.pending(result));
            }
        }
        tracing::debug!("{} finished", self.query);
        Ok(StepOutcome::Finished(result))
    }

    fn reduce(&mut self) -> Result<CompoundExpr, ReduceError> {
        reduce_context(&self.source, self.consumer, self.query, &mut self.ctx)
    }

    fn pending(&self, result: CompoundExpr) -> StepOutcome {
        if self.source.is_failed(self.query) {
            StepOutcome::Failed
        } else {
            StepOutcome::Pending(result)
        }
    }
}
