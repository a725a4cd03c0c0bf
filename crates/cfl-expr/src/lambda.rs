use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::BlockId;

/// Parameter name that labels the task slot of an application. It never takes
/// part in argument combination or in the singular-argument contract.
pub const LABEL_TASK: &str = "task";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    /// Iterated over: each concrete value yields its own invocation.
    Plain(String),
    /// Bound to the whole compound expression at once.
    Aggregate(String),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Plain(name) | Param::Aggregate(name) => name,
        }
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, Param::Plain(_))
    }
}

/// Signature of a task: inputs, outputs and how inputs vary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prototype {
    pub params: Vec<Param>,
    pub outputs: Vec<String>,
    /// Parameters and outputs vary together (zip) instead of independently (cross product).
    #[serde(default)]
    pub correlated: bool,
    /// Trailing parameter capturing excess arguments of a `rest` application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest: Option<String>,
}

impl Prototype {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::Plain(name.into()));
        self
    }

    pub fn with_aggregate(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::Aggregate(name.into()));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn with_rest(mut self, name: impl Into<String>) -> Self {
        self.rest = Some(name.into());
        self
    }

    pub fn correlated(mut self) -> Self {
        self.correlated = true;
        self
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .map(Param::name)
            .chain(self.rest.as_deref())
    }

    /// Parameters whose values are combined one atom at a time.
    pub fn iterated_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|param| param.is_plain() && param.name() != LABEL_TASK)
            .map(Param::name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.param_names().any(|param| param == name)
    }

    /// Drop a parameter; returns whether it was declared.
    pub fn remove_param(&mut self, name: &str) -> bool {
        let before = self.params.len();
        self.params.retain(|param| param.name() != name);
        let mut removed = before != self.params.len();
        if self.rest.as_deref() == Some(name) {
            self.rest = None;
            removed = true;
        }
        removed
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Output name for a 1-based channel.
    pub fn output(&self, channel: usize) -> Option<&str> {
        channel
            .checked_sub(1)
            .and_then(|idx| self.outputs.get(idx))
            .map(String::as_str)
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, out) in self.outputs.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            f.write_str(out)?;
        }
        f.write_str(" :")?;
        for param in &self.params {
            match param {
                Param::Plain(name) => write!(f, " {name}")?,
                Param::Aggregate(name) => write!(f, " <{name}>")?,
            }
        }
        if let Some(rest) = &self.rest {
            write!(f, " {rest}...")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lambda {
    Native(NativeLambda),
    Foreign(ForeignLambda),
}

impl Lambda {
    pub fn prototype(&self) -> &Prototype {
        match self {
            Lambda::Native(native) => &native.prototype,
            Lambda::Foreign(foreign) => &foreign.prototype,
        }
    }
}

/// Task defined in the language itself; its body block binds the outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeLambda {
    pub prototype: Prototype,
    pub body: BlockId,
}

/// Task executed outside the language by the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignLambda {
    pub name: String,
    pub prototype: Prototype,
    pub lang: String,
    /// Opaque invocation template handed to the backend.
    pub script: String,
}

impl ForeignLambda {
    pub fn new(
        name: impl Into<String>,
        prototype: Prototype,
        lang: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prototype,
            lang: lang.into(),
            script: script.into(),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lambda::Native(native) => write!(f, "\\{} {{ block {} }}", native.prototype, native.body),
            Lambda::Foreign(foreign) => write!(
                f,
                "\\{} in {} *{{ {} }}*",
                foreign.prototype, foreign.lang, foreign.name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_channels_are_one_based() {
        let proto = Prototype::new().with_output("a").with_output("b");
        assert_eq!(proto.output(1), Some("a"));
        assert_eq!(proto.output(2), Some("b"));
        assert_eq!(proto.output(0), None);
        assert_eq!(proto.output(3), None);
    }

    #[test]
    fn iterated_params_skip_aggregates_and_task_label() {
        let proto = Prototype::new()
            .with_param("x")
            .with_aggregate("all")
            .with_param(LABEL_TASK)
            .with_rest("more");
        let iterated: Vec<_> = proto.iterated_params().collect();
        assert_eq!(iterated, vec!["x"]);
        assert!(proto.declares("more"));
        assert!(proto.declares("all"));
    }

    #[test]
    fn remove_param_reports_whether_declared() {
        let mut proto = Prototype::new().with_param("x").with_param("y");
        assert!(proto.remove_param("x"));
        assert!(!proto.remove_param("z"));
        assert_eq!(proto.params, vec![Param::Plain("y".into())]);
    }
}
