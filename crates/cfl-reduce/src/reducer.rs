use std::collections::HashSet;

use cfl_expr::{
    ApplyExpr, BlockArena, BlockId, Bindings, CompoundExpr, CondExpr, ConsumerId, CurryExpr, Expr,
    ExprError, Lambda, NativeLambda, QualifiedTicket, QueryId, TopLevelContext,
};
use log::{debug, trace};

use crate::combine::{Combination, CombineError};
use crate::error::ReduceError;
use crate::source::TicketSource;


/// Reduce every target of a query once, replacing the target list with the
/// per-target results, then release the blocks nothing refers to any more.
/// Returns the concatenation of the targets.
pub fn reduce_context(
    source: &dyn TicketSource,
    consumer: ConsumerId,
    query: QueryId,
    ctx: &mut TopLevelContext,
) -> Result<CompoundExpr, ReduceError> {
    let (arena, root, targets) = ctx.parts_mut();
    let mut reducer = Reducer::new(source, consumer, query, arena, root);

    let mut reduced = Vec::with_capacity(targets.len());
    for target in targets.iter() {
        reduced.push(reducer.reduce(target)?);
    }

    let mut result = CompoundExpr::nil();
    for target in &reduced {
        result.append(target.clone());
    }
    *targets = reduced;

    let released = arena.collect(&[root], targets);
    if released > 0 {
        trace!("released {released} block(s) after reducing {query}");
    }
    Ok(result)
}

/// One reduction pass over a query's expressions.
///
/// The reducer owns nothing but the scope stack; blocks created while
/// beta-reducing or currying are allocated in the query's arena.
pub struct Reducer<'a> {
    source: &'a dyn TicketSource,
    consumer: ConsumerId,
    query: QueryId,
    arena: &'a mut BlockArena,
    root: BlockId,
    scopes: Vec<BlockId>,
    /// Names currently being resolved, keyed by the scope they were looked up in.
    resolving: HashSet<(BlockId, String)>,
}

impl<'a> Reducer<'a> {
    pub fn new(
        source: &'a dyn TicketSource,
        consumer: ConsumerId,
        query: QueryId,
        arena: &'a mut BlockArena,
        root: BlockId,
    ) -> Self {
        Self {
            source,
            consumer,
            query,
            arena,
            root,
            scopes: vec![root],
            resolving: HashSet::new(),
        }
    }

    /// Current scope depth; the root scope counts as one.
    #[cfg(test)]
    fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Reduce each alternative and concatenate the results in order.
    pub fn reduce(&mut self, ce: &CompoundExpr) -> Result<CompoundExpr, ReduceError> {
        let mut out = CompoundExpr::nil();
        for se in ce {
            out.append(self.reduce_single(se)?);
        }
        Ok(out)
    }

    fn reduce_single(&mut self, se: &Expr) -> Result<CompoundExpr, ReduceError> {
        match se {
            Expr::Str(_) | Expr::Lambda(_) => Ok(CompoundExpr::single(se.clone())),
            Expr::Name(name) => self.reduce_name(name),
            Expr::Ticket(qt) => Ok(self.reduce_ticket(qt)),
            Expr::Cond(cond) => self.reduce_cond(cond),
            Expr::Apply(apply) => self.reduce_apply(apply),
            Expr::Curry(curry) => self.reduce_curry(curry),
        }
    }

    fn scope(&self) -> BlockId {
        self.scopes.last().copied().unwrap_or(self.root)
    }

    /// Run `f` with `scope` pushed; the scope is popped again whatever `f` returns.
    fn with_scope<T>(
        &mut self,
        scope: BlockId,
        f: impl FnOnce(&mut Self) -> Result<T, ReduceError>,
    ) -> Result<T, ReduceError> {
        self.scopes.push(scope);
        let out = f(self);
        self.scopes.pop();
        out
    }

    fn reduce_name(&mut self, name: &str) -> Result<CompoundExpr, ReduceError> {
        let scope = self.scope();
        let bound = match self.arena.lookup(scope, name) {
            Ok(bound) => bound.clone(),
            Err(_) => return Ok(CompoundExpr::single(Expr::name(name))),
        };

        let key = (scope, name.to_string());
        if !self.resolving.insert(key.clone()) {
            trace!("{name} refers to itself in scope {scope}; left open");
            return Ok(CompoundExpr::single(Expr::name(name)));
        }
        let out = self.reduce(&bound);
        self.resolving.remove(&key);
        out
    }

    fn reduce_ticket(&self, qt: &QualifiedTicket) -> CompoundExpr {
        match self.source.ticket_output(&qt.ticket, qt.channel) {
            Some(value) => value,
            None => CompoundExpr::single(qt.clone()),
        }
    }

    fn reduce_cond(&mut self, cond: &CondExpr) -> Result<CompoundExpr, ReduceError> {
        let condition = self.reduce(&cond.condition)?;
        let output = cond
            .output_name()
            .map_err(|source| ReduceError::NotBound {
                expr: Expr::from(cond.clone()).to_string(),
                source,
            })?
            .to_string();

        let decided = if condition.is_nil() {
            Some(cond.else_block)
        } else if condition.iter().all(|se| matches!(se.num_atom(), Ok(n) if n > 0)) {
            Some(cond.then_block)
        } else {
            None
        };

        if let Some(branch) = decided {
            let value = self.branch_output(cond, branch, &output)?;
            return self.with_scope(branch, |this| this.reduce(&value));
        }

        let then_block = self.residual_branch(cond, cond.then_block)?;
        let else_block = self.residual_branch(cond, cond.else_block)?;
        Ok(CompoundExpr::single(CondExpr {
            condition,
            prototype: cond.prototype.clone(),
            channel: cond.channel,
            then_block,
            else_block,
        }))
    }

    fn branch_output(
        &self,
        cond: &CondExpr,
        branch: BlockId,
        output: &str,
    ) -> Result<CompoundExpr, ReduceError> {
        self.arena
            .get_local(branch, output)
            .cloned()
            .map_err(|source| ReduceError::NotBound {
                expr: Expr::from(cond.clone()).to_string(),
                source,
            })
    }

    /// Fresh copy of a branch block with every declared output reduced. The
    /// original block is left as it was.
    fn residual_branch(&mut self, cond: &CondExpr, branch: BlockId) -> Result<BlockId, ReduceError> {
        let mut reduced = Vec::with_capacity(cond.prototype.num_outputs());
        for output in &cond.prototype.outputs {
            let value = self.branch_output(cond, branch, output)?;
            let value = self.with_scope(branch, |this| this.reduce(&value))?;
            reduced.push((output.clone(), value));
        }

        let fresh = self.arena.clone_block(branch);
        for (output, value) in reduced {
            self.arena.bind(fresh, output, value);
        }
        Ok(fresh)
    }

    fn reduce_apply(&mut self, apply: &ApplyExpr) -> Result<CompoundExpr, ReduceError> {
        let task = self.reduce(&apply.task)?;
        let mut bindings = Bindings::with_capacity(apply.bindings.len());
        for (name, value) in &apply.bindings {
            bindings.insert(name.clone(), self.reduce(value)?);
        }

        self.dispatch_apply(ApplyExpr {
            task,
            bindings,
            channel: apply.channel,
            rest: apply.rest,
        })
    }

    /// Choose an expansion strategy for an application whose parts are reduced.
    fn dispatch_apply(&mut self, mut apply: ApplyExpr) -> Result<CompoundExpr, ReduceError> {
        if apply.rest {
            if let Err(err) = absorb_rest(&mut apply) {
                debug!("rest capture deferred: {err}");
            }
        }

        if apply.task.num_single_expr() == 1 {
            let Some(lambda) = apply.task.get(0).and_then(Expr::as_lambda) else {
                return Ok(residual(&apply));
            };
            if is_single_tuple(lambda, &apply) {
                return self.combine(&apply);
            }
        }

        self.reduce_potentially_correlated(apply)
    }

    fn reduce_potentially_correlated(
        &mut self,
        apply: ApplyExpr,
    ) -> Result<CompoundExpr, ReduceError> {
        let Some(first) = apply.task.get(0) else {
            return Ok(CompoundExpr::nil());
        };
        let Some(lambda) = first.as_lambda() else {
            return Ok(residual(&apply));
        };
        if lambda.prototype().correlated {
            return self.combine(&apply);
        }

        let n = match apply.task.num_atom() {
            Ok(n) => n,
            Err(err) => {
                debug!("task candidates not enumerable yet: {err}");
                return Ok(residual(&apply));
            }
        };
        if n == 1 {
            return self.combine(&apply);
        }

        let mut out = CompoundExpr::nil();
        for candidate in apply.task.iter() {
            let clone = ApplyExpr {
                task: CompoundExpr::single(candidate.clone()),
                bindings: apply.bindings.clone(),
                channel: apply.channel,
                rest: apply.rest,
            };
            out.append(self.dispatch_apply(clone)?);
        }
        Ok(out)
    }

    fn combine(&mut self, apply: &ApplyExpr) -> Result<CompoundExpr, ReduceError> {
        if apply.rest {
            return Ok(residual(apply));
        }

        let combination = match Combination::new(apply) {
            Ok(combination) => combination,
            Err(CombineError::NotDerivable(err)) => {
                debug!("combination deferred: {err}");
                return Ok(residual(apply));
            }
            Err(CombineError::Reduce(err)) => return Err(err),
        };

        let mut out = CompoundExpr::nil();
        for idx in 0..combination.cardinality() {
            out.append(self.reduce_singular(combination.singular(idx))?);
        }
        Ok(out)
    }

    fn reduce_singular(&mut self, singular: ApplyExpr) -> Result<CompoundExpr, ReduceError> {
        let Some(lambda) = singular.task.get(0).and_then(Expr::as_lambda) else {
            return Err(ReduceError::Model {
                expr: residual(&singular).to_string(),
                message: "singular application without a lambda".into(),
            });
        };

        let arity = lambda.prototype().num_outputs();
        if singular.channel == 0 || singular.channel > arity {
            return Err(ReduceError::ChannelOutOfRange {
                expr: residual(&singular).to_string(),
                channel: singular.channel,
                arity,
            });
        }

        let native = match lambda {
            Lambda::Native(native) => native.clone(),
            Lambda::Foreign(_) if singular.is_param_normal() => {
                let qt = self
                    .source
                    .request_ticket(self.consumer, self.query, &singular)?;
                return Ok(self.reduce_ticket(&qt));
            }
            Lambda::Foreign(_) => return Ok(residual(&singular)),
        };
        self.reduce_native(&native, singular)
    }

    /// Beta-reduce a singular native call: the arguments become a scope
    /// parented on the body and the selected output is reduced there.
    fn reduce_native(
        &mut self,
        native: &NativeLambda,
        singular: ApplyExpr,
    ) -> Result<CompoundExpr, ReduceError> {
        let label = residual(&singular).to_string();
        let output = native
            .prototype
            .output(singular.channel)
            .ok_or_else(|| ReduceError::ChannelOutOfRange {
                expr: label.clone(),
                channel: singular.channel,
                arity: native.prototype.num_outputs(),
            })?;

        let scope = self.arena.alloc(Some(native.body));
        for (name, value) in singular.bindings {
            self.arena.bind(scope, name, value);
        }

        self.with_scope(scope, |this| {
            let body = this
                .arena
                .lookup(scope, output)
                .cloned()
                .map_err(|source| ReduceError::NotBound {
                    expr: label,
                    source,
                })?;
            this.reduce(&body)
        })
    }

    fn reduce_curry(&mut self, curry: &CurryExpr) -> Result<CompoundExpr, ReduceError> {
        let label = || Expr::from(curry.clone()).to_string();
        let Some(task) = &curry.task else {
            return Err(ReduceError::Model {
                expr: label(),
                message: "task parameter not bound".into(),
            });
        };
        if task.is_nil() {
            return Err(ReduceError::Model {
                expr: label(),
                message: "task expression must not be nil".into(),
            });
        }
        if task.num_single_expr() > 1 {
            return Ok(CompoundExpr::single(curry.clone()));
        }

        let task = self.reduce(task)?;
        let mut bindings = Bindings::with_capacity(curry.bindings.len());
        for (name, value) in &curry.bindings {
            bindings.insert(name.clone(), self.reduce(value)?);
        }

        if task.is_nil() {
            return Err(ReduceError::Model {
                expr: label(),
                message: "task expression must not be nil".into(),
            });
        }
        if !matches!(task.single_exprs(), [se] if se.is_normal()) {
            return Ok(CompoundExpr::single(CurryExpr {
                task: Some(task),
                bindings,
            }));
        }
        let Some(lambda) = task.get(0).and_then(Expr::as_lambda) else {
            return Err(ReduceError::Model {
                expr: label(),
                message: format!("{task} is not a lambda expression"),
            });
        };

        let native = match lambda {
            Lambda::Native(native) => native,
            Lambda::Foreign(_) => {
                return Err(ReduceError::Unsupported(
                    "only native lambda expressions can be curried".into(),
                ));
            }
        };

        let mut prototype = native.prototype.clone();
        for name in bindings.keys() {
            prototype.remove_param(name);
        }
        let body = self.arena.clone_block(native.body);
        for (name, value) in bindings {
            self.arena.bind(body, name, value);
        }

        Ok(CompoundExpr::single(Lambda::Native(NativeLambda {
            prototype,
            body,
        })))
    }
}

fn residual(apply: &ApplyExpr) -> CompoundExpr {
    CompoundExpr::single(apply.clone())
}

/// Every iterated parameter holds exactly one value. Unbound parameters pass
/// so that combination reports them.
fn is_single_tuple(lambda: &Lambda, apply: &ApplyExpr) -> bool {
    lambda
        .prototype()
        .iterated_params()
        .all(|param| match apply.bindings.get(param) {
            Some(value) => matches!(value.num_atom(), Ok(1)),
            None => true,
        })
}

/// Move excess bindings into the task's rest parameter.
///
/// Requires the task to be exactly one lambda and every excess value to have a
/// known cardinality; otherwise the application keeps its `rest` flag and the
/// capture is retried on a later pass.
fn absorb_rest(apply: &mut ApplyExpr) -> Result<(), ExprError> {
    let prototype = match apply.task.single_exprs() {
        [Expr::Lambda(lambda)] => lambda.prototype().clone(),
        _ => return Err(ExprError::NotDerivable(apply.task.to_string())),
    };
    let Some(rest) = prototype.rest.clone() else {
        apply.rest = false;
        return Ok(());
    };

    let excess: Vec<String> = apply
        .bindings
        .keys()
        .filter(|name| !prototype.declares(name.as_str()))
        .cloned()
        .collect();
    for name in &excess {
        if let Some(value) = apply.bindings.get(name) {
            value.num_atom()?;
        }
    }

    let mut captured = apply
        .bindings
        .shift_remove(&rest)
        .unwrap_or_else(CompoundExpr::nil);
    for name in &excess {
        if let Some(value) = apply.bindings.shift_remove(name) {
            captured.append(value);
        }
    }
    apply.bindings.insert(rest, captured);
    apply.rest = false;
    Ok(())
}
