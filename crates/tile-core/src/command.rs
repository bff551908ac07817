use crate::path::NodeKind;
use crate::tree::CommandTree;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Failure raised by a command handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandFailure {
    /// An argument bound fine but has the wrong type or value.
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Failed(String),
}

impl CommandFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        CommandFailure::Failed(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CommandFailure::InvalidArgument(message.into())
    }
}

pub type Handler<T> =
    fn(&mut T, &<T as CommandTree>::Node, &BoundArgs) -> Result<Value, CommandFailure>;

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            default: None,
        }
    }

    pub fn optional(name: &'static str, default: Value) -> Self {
        Self {
            name,
            default: Some(default),
        }
    }
}

/// Signature plus handler of one command.
pub struct CommandSpec<T: CommandTree> {
    pub name: &'static str,
    pub params: Vec<Param>,
    pub accepts_kwargs: bool,
    pub doc: &'static str,
    pub handler: Handler<T>,
}

impl<T: CommandTree> CommandSpec<T> {
    pub fn new(name: &'static str, handler: Handler<T>) -> Self {
        Self {
            name,
            params: Vec::new(),
            accepts_kwargs: false,
            doc: "",
            handler,
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn kwargs(mut self) -> Self {
        self.accepts_kwargs = true;
        self
    }

    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    pub fn signature(&self) -> Signature<'_> {
        Signature {
            name: self.name,
            params: &self.params,
            accepts_kwargs: self.accepts_kwargs,
        }
    }
}

/// Display helper rendering `name(a, b=1, **kwargs)`.
pub struct Signature<'a> {
    pub name: &'a str,
    pub params: &'a [Param],
    pub accepts_kwargs: bool,
}

impl fmt::Display for Signature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for param in self.params {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match &param.default {
                Some(default) => write!(f, "{}={}", param.name, default)?,
                None => f.write_str(param.name)?,
            }
        }
        if self.accepts_kwargs {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str("**kwargs")?;
        }
        f.write_str(")")
    }
}

/// Commands callable on one node kind.
pub struct CommandDescriptor<T: CommandTree> {
    kind: NodeKind,
    commands: BTreeMap<&'static str, CommandSpec<T>>,
}

impl<T: CommandTree> CommandDescriptor<T> {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            commands: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn command(mut self, spec: CommandSpec<T>) -> Self {
        self.commands.insert(spec.name, spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec<T>> {
        self.commands.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// One descriptor per node kind.
pub struct CommandTable<T: CommandTree> {
    descriptors: HashMap<NodeKind, CommandDescriptor<T>>,
}

impl<T: CommandTree> CommandTable<T> {
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    pub fn register(mut self, descriptor: CommandDescriptor<T>) -> Self {
        self.descriptors.insert(descriptor.kind(), descriptor);
        self
    }

    pub fn descriptor(&self, kind: NodeKind) -> Option<&CommandDescriptor<T>> {
        self.descriptors.get(&kind)
    }
}

impl<T: CommandTree> Default for CommandTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments after binding against a parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: Vec<(&'static str, Value)>,
    extra: Map<String, Value>,
}

impl BoundArgs {
    /// Bound value of `name`, `Null` when the name is unknown.
    pub fn get(&self, name: &str) -> &Value {
        self.values
            .iter()
            .find(|(param, _)| *param == name)
            .map(|(_, value)| value)
            .unwrap_or(&Value::Null)
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn str(&self, name: &str) -> Result<&str, CommandFailure> {
        self.get(name)
            .as_str()
            .ok_or_else(|| CommandFailure::invalid(format!("{name} must be a string")))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>, CommandFailure> {
        match self.get(name) {
            Value::Null => Ok(None),
            _ => self.str(name).map(Some),
        }
    }

    pub fn i64(&self, name: &str) -> Result<i64, CommandFailure> {
        self.get(name)
            .as_i64()
            .ok_or_else(|| CommandFailure::invalid(format!("{name} must be an integer")))
    }

    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>, CommandFailure> {
        match self.get(name) {
            Value::Null => Ok(None),
            _ => self.i64(name).map(Some),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, CommandFailure> {
        self.get(name)
            .as_bool()
            .ok_or_else(|| CommandFailure::invalid(format!("{name} must be a boolean")))
    }
}

/// Binds positional arguments, then keywords, then defaults.
pub fn bind_arguments(
    name: &str,
    params: &[Param],
    accepts_kwargs: bool,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<BoundArgs, String> {
    if args.len() > params.len() {
        return Err(format!(
            "{name}() takes {} positional arguments but {} were given",
            params.len(),
            args.len()
        ));
    }

    let mut slots: Vec<Option<Value>> = params.iter().map(|_| None).collect();
    for (slot, value) in slots.iter_mut().zip(args) {
        *slot = Some(value.clone());
    }

    let mut extra = Map::new();
    for (key, value) in kwargs {
        match params.iter().position(|param| param.name == key) {
            Some(idx) if slots[idx].is_some() => {
                return Err(format!("{name}() got multiple values for argument '{key}'"));
            }
            Some(idx) => slots[idx] = Some(value.clone()),
            None if accepts_kwargs => {
                extra.insert(key.clone(), value.clone());
            }
            None => {
                return Err(format!("{name}() got an unexpected keyword argument '{key}'"));
            }
        }
    }

    let mut values = Vec::with_capacity(params.len());
    for (param, slot) in params.iter().zip(slots) {
        let value = match (slot, &param.default) {
            (Some(value), _) => value,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(format!(
                    "{name}() missing required argument '{}'",
                    param.name
                ));
            }
        };
        values.push((param.name, value));
    }

    Ok(BoundArgs { values, extra })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Vec<Param> {
        vec![
            Param::required("name"),
            Param::optional("group", Value::Null),
            Param::optional("floating", json!(false)),
        ]
    }

    #[test]
    fn positionals_then_keywords_then_defaults() {
        let mut kwargs = Map::new();
        kwargs.insert("floating".to_string(), json!(true));
        let bound = bind_arguments("add_window", &params(), false, &[json!("term")], &kwargs)
            .expect("bind");
        assert_eq!(bound.str("name"), Ok("term"));
        assert_eq!(bound.opt_str("group"), Ok(None));
        assert_eq!(bound.bool("floating"), Ok(true));
        assert_eq!(bound.get("unknown"), &Value::Null);
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let err = bind_arguments("add_window", &params(), false, &[], &Map::new())
            .expect_err("missing");
        assert_eq!(err, "add_window() missing required argument 'name'");
    }

    #[test]
    fn too_many_positionals_are_rejected() {
        let err = bind_arguments("status", &[], false, &[json!(1)], &Map::new())
            .expect_err("arity");
        assert_eq!(err, "status() takes 0 positional arguments but 1 were given");
    }

    #[test]
    fn duplicate_and_unknown_keywords() {
        let mut kwargs = Map::new();
        kwargs.insert("name".to_string(), json!("again"));
        let err = bind_arguments("add_window", &params(), false, &[json!("term")], &kwargs)
            .expect_err("duplicate");
        assert!(err.contains("multiple values"));

        let mut kwargs = Map::new();
        kwargs.insert("colour".to_string(), json!("red"));
        let err = bind_arguments("add_window", &params(), false, &[json!("term")], &kwargs)
            .expect_err("unknown");
        assert!(err.contains("unexpected keyword argument 'colour'"));

        let bound = bind_arguments("add_window", &params(), true, &[json!("term")], &kwargs)
            .expect("kwargs accepted");
        assert_eq!(bound.extra().get("colour"), Some(&json!("red")));
    }

    #[test]
    fn typed_accessors_report_invalid_arguments() {
        let bound = bind_arguments(
            "to_screen",
            &[Param::required("index")],
            false,
            &[json!("zero")],
            &Map::new(),
        )
        .expect("bind");
        assert_eq!(
            bound.i64("index"),
            Err(CommandFailure::InvalidArgument(
                "index must be an integer".to_string()
            ))
        );
    }

    #[test]
    fn signature_renders_defaults_and_kwargs() {
        let params = params();
        let signature = Signature {
            name: "add_window",
            params: &params,
            accepts_kwargs: true,
        };
        assert_eq!(
            signature.to_string(),
            "add_window(name, group=null, floating=false, **kwargs)"
        );
    }
}
