use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::block::BlockId;
use crate::error::ExprError;
use crate::ids::TicketId;
use crate::lambda::{Lambda, Prototype};

/// Argument bindings of an application or curry, in binding order.
pub type Bindings = IndexMap<String, CompoundExpr>;

/// One alternative of a compound expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Name(String),
    Str(String),
    Apply(Box<ApplyExpr>),
    Lambda(Box<Lambda>),
    Cond(Box<CondExpr>),
    Curry(Box<CurryExpr>),
    Ticket(QualifiedTicket),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Str(value.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Name(_) => "name",
            Expr::Str(_) => "str",
            Expr::Apply(_) => "apply",
            Expr::Lambda(_) => "lambda",
            Expr::Cond(_) => "cond",
            Expr::Curry(_) => "curry",
            Expr::Ticket(_) => "ticket",
        }
    }

    /// Number of concrete values this expression denotes, if already known.
    pub fn num_atom(&self) -> Result<usize, ExprError> {
        match self {
            Expr::Str(_) | Expr::Lambda(_) => Ok(1),
            Expr::Name(_) | Expr::Apply(_) | Expr::Cond(_) | Expr::Curry(_) | Expr::Ticket(_) => {
                Err(ExprError::NotDerivable(self.to_string()))
            }
        }
    }

    /// A concrete value: nothing left to reduce.
    pub fn is_normal(&self) -> bool {
        matches!(self, Expr::Str(_) | Expr::Lambda(_))
    }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(lambda) => Some(lambda.as_ref()),
            _ => None,
        }
    }

    /// Push every block this term refers to: native lambda bodies and
    /// conditional branches, including those of nested terms.
    pub fn referenced_blocks(&self, out: &mut Vec<BlockId>) {
        match self {
            Expr::Name(_) | Expr::Str(_) | Expr::Ticket(_) => {}
            Expr::Lambda(lambda) => {
                if let Lambda::Native(native) = lambda.as_ref() {
                    out.push(native.body);
                }
            }
            Expr::Apply(apply) => {
                apply.task.referenced_blocks(out);
                for value in apply.bindings.values() {
                    value.referenced_blocks(out);
                }
            }
            Expr::Cond(cond) => {
                cond.condition.referenced_blocks(out);
                out.push(cond.then_block);
                out.push(cond.else_block);
            }
            Expr::Curry(curry) => {
                if let Some(task) = &curry.task {
                    task.referenced_blocks(out);
                }
                for value in curry.bindings.values() {
                    value.referenced_blocks(out);
                }
            }
        }
    }
}

impl From<Lambda> for Expr {
    fn from(value: Lambda) -> Self {
        Expr::Lambda(Box::new(value))
    }
}

impl From<ApplyExpr> for Expr {
    fn from(value: ApplyExpr) -> Self {
        Expr::Apply(Box::new(value))
    }
}

impl From<CondExpr> for Expr {
    fn from(value: CondExpr) -> Self {
        Expr::Cond(Box::new(value))
    }
}

impl From<CurryExpr> for Expr {
    fn from(value: CurryExpr) -> Self {
        Expr::Curry(Box::new(value))
    }
}

impl From<QualifiedTicket> for Expr {
    fn from(value: QualifiedTicket) -> Self {
        Expr::Ticket(value)
    }
}

/// Ordered sequence of alternatives; denotes zero, one or many values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompoundExpr(Vec<Expr>);

impl CompoundExpr {
    /// The empty compound (nil).
    pub fn nil() -> Self {
        Self(Vec::new())
    }

    pub fn single(expr: impl Into<Expr>) -> Self {
        Self(vec![expr.into()])
    }

    /// Convenience for a sequence of string literals.
    pub fn strs<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        values.into_iter().map(Expr::str).collect()
    }

    pub fn push(&mut self, expr: impl Into<Expr>) {
        self.0.push(expr.into());
    }

    /// Append every alternative of `other`, preserving order.
    pub fn append(&mut self, other: CompoundExpr) {
        self.0.extend(other.0);
    }

    pub fn num_single_expr(&self) -> usize {
        self.0.len()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn single_exprs(&self) -> &[Expr] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> Option<&Expr> {
        self.0.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expr> {
        self.0.iter()
    }

    /// Sum of the alternatives' cardinalities; not derivable if any part is not.
    pub fn num_atom(&self) -> Result<usize, ExprError> {
        self.0.iter().map(Expr::num_atom).sum()
    }

    pub fn is_normal(&self) -> bool {
        self.0.iter().all(Expr::is_normal)
    }

    pub fn referenced_blocks(&self, out: &mut Vec<BlockId>) {
        for se in &self.0 {
            se.referenced_blocks(out);
        }
    }
}

impl FromIterator<Expr> for CompoundExpr {
    fn from_iter<T: IntoIterator<Item = Expr>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for CompoundExpr {
    type Item = Expr;
    type IntoIter = std::vec::IntoIter<Expr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CompoundExpr {
    type Item = &'a Expr;
    type IntoIter = std::slice::Iter<'a, Expr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Task application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyExpr {
    pub task: CompoundExpr,
    pub bindings: Bindings,
    /// 1-based output selector.
    pub channel: usize,
    /// Excess bindings still wait to be captured by the task's rest parameter.
    #[serde(default)]
    pub rest: bool,
}

impl ApplyExpr {
    pub fn new(task: CompoundExpr, channel: usize) -> Self {
        Self {
            task,
            bindings: Bindings::new(),
            channel,
            rest: false,
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: CompoundExpr) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn with_rest(mut self) -> Self {
        self.rest = true;
        self
    }

    pub fn binding(&self, name: &str) -> Result<&CompoundExpr, ExprError> {
        self.bindings
            .get(name)
            .ok_or_else(|| ExprError::NotBound(name.to_string()))
    }

    /// Every bound argument is fully reduced to concrete values.
    pub fn is_param_normal(&self) -> bool {
        self.bindings.values().all(CompoundExpr::is_normal)
    }
}

/// Conditional with ternary truth over the condition's cardinality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondExpr {
    pub condition: CompoundExpr,
    pub prototype: Prototype,
    pub channel: usize,
    pub then_block: BlockId,
    pub else_block: BlockId,
}

impl CondExpr {
    /// Output selected by this conditional's channel.
    pub fn output_name(&self) -> Result<&str, ExprError> {
        self.prototype
            .output(self.channel)
            .ok_or_else(|| ExprError::NotBound(format!("output channel {}", self.channel)))
    }
}

/// Partial application baking bindings into a native lambda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurryExpr {
    pub task: Option<CompoundExpr>,
    pub bindings: Bindings,
}

impl CurryExpr {
    pub fn new(task: CompoundExpr) -> Self {
        Self {
            task: Some(task),
            bindings: Bindings::new(),
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: CompoundExpr) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }
}

/// Placeholder for output `channel` of a ticket that has not been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedTicket {
    pub ticket: TicketId,
    pub channel: usize,
    /// Output name for display; not part of the identity.
    pub output: String,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Name(name) => f.write_str(name),
            Expr::Str(value) => write!(f, "'{value}'"),
            Expr::Apply(apply) => {
                write!(f, "apply( task: {}", apply.task)?;
                for (name, value) in &apply.bindings {
                    write!(f, ", {name}: {value}")?;
                }
                if apply.rest {
                    f.write_str(", ...")?;
                }
                write!(f, " )#{}", apply.channel)
            }
            Expr::Lambda(lambda) => write!(f, "{lambda}"),
            Expr::Cond(cond) => write!(
                f,
                "if {} then {} else {} end#{}",
                cond.condition, cond.then_block, cond.else_block, cond.channel
            ),
            Expr::Curry(curry) => {
                f.write_str("curry( task: ")?;
                match &curry.task {
                    Some(task) => write!(f, "{task}")?,
                    None => f.write_str("?")?,
                }
                for (name, value) in &curry.bindings {
                    write!(f, ", {name}: {value}")?;
                }
                f.write_str(" )")
            }
            Expr::Ticket(qt) => write!(f, "{}#{}", qt.ticket, qt.channel),
        }
    }
}

impl fmt::Display for CompoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("nil");
        }
        for (idx, expr) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::ForeignLambda;

    #[test]
    fn literal_sequences_have_known_cardinality() {
        let ce = CompoundExpr::strs(["a", "b", "c"]);
        assert_eq!(ce.num_atom(), Ok(3));
        assert!(ce.is_normal());
        assert_eq!(CompoundExpr::nil().num_atom(), Ok(0));
    }

    #[test]
    fn open_terms_make_cardinality_not_derivable() {
        let mut ce = CompoundExpr::strs(["a"]);
        ce.push(Expr::name("x"));
        assert!(matches!(ce.num_atom(), Err(ExprError::NotDerivable(_))));
        assert!(!ce.is_normal());
    }

    #[test]
    fn lambdas_count_as_one_value() {
        let lambda = Lambda::Foreign(ForeignLambda::new(
            "wc",
            Prototype::new().with_param("f").with_output("n"),
            "bash",
            "wc -l $f > $n",
        ));
        let ce = CompoundExpr::single(lambda);
        assert_eq!(ce.num_atom(), Ok(1));
    }

    #[test]
    fn display_renders_compound_alternatives() {
        let apply = ApplyExpr::new(CompoundExpr::single(Expr::name("f")), 1)
            .with_binding("x", CompoundExpr::strs(["1", "2"]));
        let mut ce = CompoundExpr::single(Expr::str("a"));
        ce.push(apply);
        assert_eq!(ce.to_string(), "'a' apply( task: f, x: '1' '2' )#1");
        assert_eq!(CompoundExpr::nil().to_string(), "nil");
    }
}
