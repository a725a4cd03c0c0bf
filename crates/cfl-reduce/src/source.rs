use cfl_expr::{
    ApplyExpr, CompoundExpr, ConsumerId, Expr, ForeignLambda, Lambda, QualifiedTicket, QueryId,
    TicketId,
};

use crate::error::TicketRequestError;

/// Seam between the reducer and the ticket scheduler.
///
/// Both calls must appear atomic to concurrent callers; implementations
/// serialize them over the ticket cache.
pub trait TicketSource {
    /// Turn a fully resolved foreign application into a qualified ticket,
    /// dispatching it to the execution backend the first time it is seen.
    fn request_ticket(
        &self,
        consumer: ConsumerId,
        query: QueryId,
        apply: &ApplyExpr,
    ) -> Result<QualifiedTicket, TicketRequestError>;

    /// Output `channel` of a ticket that already finished, if any.
    fn ticket_output(&self, ticket: &TicketId, channel: usize) -> Option<CompoundExpr>;
}

/// Check the invocation contract of a ticket request and return its lambda.
///
/// The task expression must be exactly one foreign lambda and every plain
/// parameter other than the task label must be bound to exactly one value.
/// Aggregate and rest parameters may hold any number of values. Every value
/// handed to the backend must be a string literal: a lambda's body lives in
/// the requesting query's arena and cannot take part in the ticket identity.
pub fn foreign_task(apply: &ApplyExpr) -> Result<&ForeignLambda, TicketRequestError> {
    let expr = || apply_label(apply);
    match apply.task.num_atom() {
        Ok(1) => {}
        Ok(count) => {
            return Err(TicketRequestError::TaskNotSingular {
                expr: expr(),
                count,
            });
        }
        Err(_) => return Err(TicketRequestError::TaskNotDerivable(expr())),
    }
    let Some(Lambda::Foreign(lambda)) = apply.task.get(0).and_then(|se| se.as_lambda()) else {
        return Err(TicketRequestError::NotForeign(expr()));
    };

    for param in lambda.prototype.iterated_params() {
        let value = apply
            .binding(param)
            .map_err(|_| TicketRequestError::ArgumentNotBound {
                expr: expr(),
                param: param.to_string(),
            })?;
        match value.num_atom() {
            Ok(1) => {}
            Ok(count) => {
                return Err(TicketRequestError::ArgumentNotSingular {
                    expr: expr(),
                    param: param.to_string(),
                    count,
                });
            }
            Err(_) => {
                return Err(TicketRequestError::ArgumentNotDerivable {
                    expr: expr(),
                    param: param.to_string(),
                });
            }
        }
    }

    for (param, value) in &apply.bindings {
        if let Some(other) = value.iter().find(|se| !matches!(se, Expr::Str(_))) {
            return Err(TicketRequestError::ArgumentNotLiteral {
                expr: expr(),
                param: param.clone(),
                kind: other.kind(),
            });
        }
    }
    Ok(lambda)
}

fn apply_label(apply: &ApplyExpr) -> String {
    Expr::from(apply.clone()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfl_expr::{BlockArena, NativeLambda, Prototype};

    fn foreign() -> Lambda {
        Lambda::Foreign(ForeignLambda::new(
            "cat",
            Prototype::new()
                .with_param("a")
                .with_aggregate("all")
                .with_output("out"),
            "bash",
            "cat $a ${all[@]} > $out",
        ))
    }

    #[test]
    fn accepts_singular_plain_and_any_aggregate() {
        let apply = ApplyExpr::new(CompoundExpr::single(foreign()), 1)
            .with_binding("a", CompoundExpr::strs(["x"]))
            .with_binding("all", CompoundExpr::strs(["y", "z"]));
        let lambda = foreign_task(&apply).unwrap();
        assert_eq!(lambda.name, "cat");
    }

    #[test]
    fn rejects_plural_argument() {
        let apply = ApplyExpr::new(CompoundExpr::single(foreign()), 1)
            .with_binding("a", CompoundExpr::strs(["x", "y"]))
            .with_binding("all", CompoundExpr::nil());
        let err = foreign_task(&apply).unwrap_err();
        assert!(matches!(
            err,
            TicketRequestError::ArgumentNotSingular { param, count: 2, .. } if param == "a"
        ));
    }

    #[test]
    fn rejects_open_argument_and_missing_binding() {
        let open = ApplyExpr::new(CompoundExpr::single(foreign()), 1)
            .with_binding("a", CompoundExpr::single(Expr::name("x")));
        assert!(matches!(
            foreign_task(&open),
            Err(TicketRequestError::ArgumentNotDerivable { .. })
        ));

        let missing = ApplyExpr::new(CompoundExpr::single(foreign()), 1);
        assert!(matches!(
            foreign_task(&missing),
            Err(TicketRequestError::ArgumentNotBound { param, .. }) if param == "a"
        ));
    }

    #[test]
    fn rejects_non_foreign_or_plural_task() {
        let string_task = ApplyExpr::new(CompoundExpr::strs(["f"]), 1);
        assert!(matches!(
            foreign_task(&string_task),
            Err(TicketRequestError::NotForeign(_))
        ));

        let mut two = CompoundExpr::single(foreign());
        two.push(foreign());
        let plural = ApplyExpr::new(two, 1);
        assert!(matches!(
            foreign_task(&plural),
            Err(TicketRequestError::TaskNotSingular { count: 2, .. })
        ));
    }

    #[test]
    fn rejects_lambda_valued_arguments() {
        let mut arena = BlockArena::new();
        let body = arena.alloc(None);
        let lambda = Lambda::Native(NativeLambda {
            prototype: Prototype::new().with_output("y"),
            body,
        });

        let plain = ApplyExpr::new(CompoundExpr::single(foreign()), 1)
            .with_binding("a", CompoundExpr::single(lambda.clone()))
            .with_binding("all", CompoundExpr::nil());
        assert!(matches!(
            foreign_task(&plain),
            Err(TicketRequestError::ArgumentNotLiteral { param, kind: "lambda", .. }) if param == "a"
        ));

        let mut mixed = CompoundExpr::strs(["y"]);
        mixed.push(lambda);
        let aggregate = ApplyExpr::new(CompoundExpr::single(foreign()), 1)
            .with_binding("a", CompoundExpr::strs(["x"]))
            .with_binding("all", mixed);
        assert!(matches!(
            foreign_task(&aggregate),
            Err(TicketRequestError::ArgumentNotLiteral { param, .. }) if param == "all"
        ));
    }
}
