use std::collections::BTreeMap;

use cfl_cbor::{Hash, to_canonical_cbor};
use serde::{Deserialize, Serialize};

use crate::error::TicketEncodeError;
use crate::expr::CompoundExpr;
use crate::ids::{RunId, TicketId};
use crate::lambda::ForeignLambda;

/// One concrete foreign-task invocation inside a run, addressed by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    id: TicketId,
    run: RunId,
    lambda: ForeignLambda,
    bindings: BTreeMap<String, CompoundExpr>,
}

impl Ticket {
    pub fn new(
        run: RunId,
        lambda: ForeignLambda,
        bindings: BTreeMap<String, CompoundExpr>,
    ) -> Result<Self, TicketEncodeError> {
        let id = compute_ticket_id(&lambda, &bindings, &run)?;
        Ok(Self {
            id,
            run,
            lambda,
            bindings,
        })
    }

    pub fn id(&self) -> TicketId {
        self.id
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn lambda(&self) -> &ForeignLambda {
        &self.lambda
    }

    pub fn bindings(&self) -> &BTreeMap<String, CompoundExpr> {
        &self.bindings
    }

    pub fn num_outputs(&self) -> usize {
        self.lambda.prototype.num_outputs()
    }

    pub fn output_name(&self, channel: usize) -> Option<&str> {
        self.lambda.prototype.output(channel)
    }

    pub fn script(&self) -> &str {
        &self.lambda.script
    }
}

fn compute_ticket_id(
    lambda: &ForeignLambda,
    bindings: &BTreeMap<String, CompoundExpr>,
    run: &RunId,
) -> Result<TicketId, TicketEncodeError> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        lambda: &'a ForeignLambda,
        bindings: &'a BTreeMap<String, CompoundExpr>,
        run: &'a RunId,
    }

    let bytes = to_canonical_cbor(&Envelope {
        lambda,
        bindings,
        run,
    })?;
    Ok(TicketId::from(Hash::of_bytes(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::Prototype;

    fn wc() -> ForeignLambda {
        ForeignLambda::new(
            "wc",
            Prototype::new().with_param("file").with_output("n"),
            "bash",
            "n=`wc -l $file`",
        )
    }

    fn args(file: &str) -> BTreeMap<String, CompoundExpr> {
        BTreeMap::from([("file".to_string(), CompoundExpr::strs([file]))])
    }

    #[test]
    fn identical_invocations_share_identity() {
        let run = RunId::new();
        let a = Ticket::new(run, wc(), args("a.txt")).unwrap();
        let b = Ticket::new(run, wc(), args("a.txt")).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.num_outputs(), 1);
        assert_eq!(a.output_name(1), Some("n"));
    }

    #[test]
    fn arguments_lambda_and_run_all_feed_identity() {
        let run = RunId::new();
        let base = Ticket::new(run, wc(), args("a.txt")).unwrap();

        let other_arg = Ticket::new(run, wc(), args("b.txt")).unwrap();
        assert_ne!(base.id(), other_arg.id());

        let mut lambda = wc();
        lambda.script = "n=`wc -c $file`".into();
        let other_lambda = Ticket::new(run, lambda, args("a.txt")).unwrap();
        assert_ne!(base.id(), other_lambda.id());

        let other_run = Ticket::new(RunId::new(), wc(), args("a.txt")).unwrap();
        assert_ne!(base.id(), other_run.id());
    }
}
