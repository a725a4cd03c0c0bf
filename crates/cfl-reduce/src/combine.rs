//! Parameter combination: expands one application into singular invocations.

use cfl_expr::{
    ApplyExpr, Bindings, CompoundExpr, Expr, ExprError, LABEL_TASK, Lambda, Param,
};

use crate::error::ReduceError;

pub(crate) enum CombineError {
    /// Some cardinality is not known yet; keep the application residual.
    NotDerivable(ExprError),
    Reduce(ReduceError),
}

impl From<ReduceError> for CombineError {
    fn from(err: ReduceError) -> Self {
        CombineError::Reduce(err)
    }
}

/// Enumerates the singular applications denoted by an application whose
/// task candidates are all lambdas.
///
/// Correlated prototypes zip the plain arguments (and the task candidates when
/// there are several); uncorrelated prototypes take the cross product with the
/// task candidates outermost and the last parameter varying fastest.
pub(crate) struct Combination<'a> {
    apply: &'a ApplyExpr,
    lambdas: Vec<&'a Lambda>,
    iterated: Vec<(&'a str, &'a [Expr])>,
    correlated: bool,
    cardinality: usize,
}

impl<'a> Combination<'a> {
    pub(crate) fn new(apply: &'a ApplyExpr) -> Result<Self, CombineError> {
        let label = || Expr::from(apply.clone()).to_string();

        let mut lambdas = Vec::with_capacity(apply.task.num_single_expr());
        for candidate in apply.task.iter() {
            match candidate {
                Expr::Lambda(lambda) => lambdas.push(lambda.as_ref()),
                other if other.is_normal() => {
                    return Err(ReduceError::Model {
                        expr: label(),
                        message: format!("{other} is not a lambda expression"),
                    }
                    .into());
                }
                other => {
                    return Err(CombineError::NotDerivable(ExprError::NotDerivable(
                        other.to_string(),
                    )));
                }
            }
        }

        let Some(first) = lambdas.first() else {
            return Ok(Self {
                apply,
                lambdas,
                iterated: Vec::new(),
                correlated: false,
                cardinality: 0,
            });
        };
        let prototype = first.prototype();

        for param in &prototype.params {
            if let Param::Aggregate(name) = param {
                if !apply.bindings.contains_key(name) {
                    return Err(ReduceError::ParamNotBound {
                        expr: label(),
                        param: name.clone(),
                    }
                    .into());
                }
            }
        }

        let mut iterated = Vec::new();
        for name in prototype.iterated_params() {
            let value = apply.binding(name).map_err(|_| ReduceError::ParamNotBound {
                expr: label(),
                param: name.to_string(),
            })?;
            value.num_atom().map_err(CombineError::NotDerivable)?;
            iterated.push((name, value.single_exprs()));
        }

        let correlated = prototype.correlated;
        let cardinality = if correlated {
            let mut lengths: Vec<(&str, usize)> = Vec::with_capacity(iterated.len() + 1);
            if lambdas.len() > 1 {
                lengths.push((LABEL_TASK, lambdas.len()));
            }
            lengths.extend(iterated.iter().map(|(name, values)| (*name, values.len())));
            match lengths.first() {
                None => 1,
                Some(&(_, n)) if lengths.iter().all(|&(_, m)| m == n) => n,
                Some(_) => {
                    let lengths = lengths
                        .iter()
                        .map(|(name, n)| format!("{name}={n}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(ReduceError::CorrelationMismatch {
                        expr: label(),
                        lengths,
                    }
                    .into());
                }
            }
        } else {
            lambdas.len()
                * iterated
                    .iter()
                    .map(|(_, values)| values.len())
                    .product::<usize>()
        };

        Ok(Self {
            apply,
            lambdas,
            iterated,
            correlated,
            cardinality,
        })
    }

    pub(crate) fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// The `idx`-th singular application: one lambda and one value per plain
    /// parameter. Other bindings are carried over whole.
    pub(crate) fn singular(&self, idx: usize) -> ApplyExpr {
        let mut picks: Vec<(&str, &Expr)> = Vec::with_capacity(self.iterated.len());
        let lambda = if self.correlated {
            for (name, values) in &self.iterated {
                picks.push((name, &values[idx]));
            }
            if self.lambdas.len() == 1 {
                self.lambdas[0]
            } else {
                self.lambdas[idx]
            }
        } else {
            let mut rem = idx;
            for (name, values) in self.iterated.iter().rev() {
                picks.push((name, &values[rem % values.len()]));
                rem /= values.len();
            }
            self.lambdas[rem]
        };

        let mut bindings = Bindings::with_capacity(self.apply.bindings.len());
        for (name, value) in &self.apply.bindings {
            let bound = match picks.iter().find(|(pick, _)| pick == name) {
                Some((_, expr)) => CompoundExpr::single((*expr).clone()),
                None => value.clone(),
            };
            bindings.insert(name.clone(), bound);
        }

        ApplyExpr {
            task: CompoundExpr::single(lambda.clone()),
            bindings,
            channel: self.apply.channel,
            rest: false,
        }
    }
}
