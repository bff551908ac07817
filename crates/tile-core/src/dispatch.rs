use crate::command::{bind_arguments, BoundArgs, CommandFailure, CommandTable, Param, Signature};
use crate::path::NodeKind;
use crate::tree::{children, resolve, CommandTree};
use crate::wire::{CommandRequest, CommandResponse, ErrorKind};
use serde_json::{json, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Introspection commands served on every node.
const BUILTINS: [(&str, &str); 3] = [
    ("commands", "List the commands available on this node."),
    ("doc", "Show the signature and help text of a command."),
    ("items", "List child tags and the instances reachable through them."),
];

fn builtin_params(name: &str) -> Vec<Param> {
    match name {
        "doc" => vec![Param::required("name")],
        "items" => vec![Param::optional("name", Value::Null)],
        _ => Vec::new(),
    }
}

/// Owns the tree and executes requests against it one at a time.
pub struct Dispatcher<T: CommandTree> {
    tree: T,
    table: CommandTable<T>,
}

impl<T: CommandTree> Dispatcher<T> {
    pub fn new(tree: T) -> Self {
        Self {
            tree,
            table: T::command_table(),
        }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    pub fn into_tree(self) -> T {
        self.tree
    }

    pub fn dispatch(&mut self, request: &CommandRequest) -> CommandResponse {
        let node = match resolve(&self.tree, &request.path) {
            Ok(node) => node,
            Err(err) => {
                debug!(event = "command_path_not_found", path = %request.path, error = %err);
                return CommandResponse::error(ErrorKind::PathNotFound, err.to_string());
            }
        };

        let response = if BUILTINS.iter().any(|(name, _)| *name == request.command) {
            self.builtin(&node, request)
        } else {
            self.invoke(&node, request)
        };

        debug!(
            event = "command_dispatched",
            path = %request.path,
            command = %request.command,
            ok = response.is_success()
        );
        response
    }

    fn invoke(&mut self, node: &T::Node, request: &CommandRequest) -> CommandResponse {
        let kind = T::kind_of(node);
        let Some(spec) = self
            .table
            .descriptor(kind)
            .and_then(|descriptor| descriptor.get(&request.command))
        else {
            return CommandResponse::error(
                ErrorKind::CommandNotFound,
                format!("no command '{}' on {kind}", request.command),
            );
        };

        let bound = match bind_arguments(
            spec.name,
            &spec.params,
            spec.accepts_kwargs,
            &request.args,
            &request.kwargs,
        ) {
            Ok(bound) => bound,
            Err(message) => return CommandResponse::error(ErrorKind::InvalidArguments, message),
        };

        let handler = spec.handler;
        let tree = &mut self.tree;
        match panic::catch_unwind(AssertUnwindSafe(|| handler(tree, node, &bound))) {
            Ok(Ok(value)) => CommandResponse::success(value),
            Ok(Err(CommandFailure::InvalidArgument(message))) => {
                CommandResponse::error(ErrorKind::InvalidArguments, message)
            }
            Ok(Err(CommandFailure::Failed(message))) => {
                CommandResponse::error(ErrorKind::CommandException, message)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(
                    event = "command_panicked",
                    path = %request.path,
                    command = %request.command,
                    error = %message
                );
                CommandResponse::error(
                    ErrorKind::CommandException,
                    format!("{} panicked: {message}", request.command),
                )
            }
        }
    }

    fn builtin(&self, node: &T::Node, request: &CommandRequest) -> CommandResponse {
        let params = builtin_params(&request.command);
        let bound = match bind_arguments(
            &request.command,
            &params,
            false,
            &request.args,
            &request.kwargs,
        ) {
            Ok(bound) => bound,
            Err(message) => return CommandResponse::error(ErrorKind::InvalidArguments, message),
        };

        let result = match request.command.as_str() {
            "commands" => Ok(json!(self.command_names(node))),
            "doc" => return self.doc(node, &bound),
            _ => self.items(node, &bound),
        };
        match result {
            Ok(value) => CommandResponse::success(value),
            Err(failure) => CommandResponse::error(ErrorKind::InvalidArguments, failure.to_string()),
        }
    }

    /// Sorted names of every command callable on `node`.
    pub fn command_names(&self, node: &T::Node) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = BUILTINS.iter().map(|(name, _)| *name).collect();
        if let Some(descriptor) = self.table.descriptor(T::kind_of(node)) {
            names.extend(descriptor.names());
        }
        names.sort_unstable();
        names.dedup();
        names
    }

    fn doc(&self, node: &T::Node, args: &BoundArgs) -> CommandResponse {
        let name = match args.str("name") {
            Ok(name) => name,
            Err(failure) => {
                return CommandResponse::error(ErrorKind::InvalidArguments, failure.to_string())
            }
        };

        if let Some((builtin, help)) = BUILTINS.iter().find(|(builtin, _)| *builtin == name) {
            let params = builtin_params(builtin);
            let signature = Signature {
                name: builtin,
                params: &params,
                accepts_kwargs: false,
            };
            return CommandResponse::success(json!(format!("{signature}\n\n{help}")));
        }

        let kind = T::kind_of(node);
        match self
            .table
            .descriptor(kind)
            .and_then(|descriptor| descriptor.get(name))
        {
            Some(spec) if spec.doc.is_empty() => {
                CommandResponse::success(json!(spec.signature().to_string()))
            }
            Some(spec) => {
                CommandResponse::success(json!(format!("{}\n\n{}", spec.signature(), spec.doc)))
            }
            None => CommandResponse::error(
                ErrorKind::CommandNotFound,
                format!("no command '{name}' on {kind}"),
            ),
        }
    }

    fn items(&self, node: &T::Node, args: &BoundArgs) -> Result<Value, CommandFailure> {
        let kind = T::kind_of(node);
        let Some(tag) = args.opt_str("name")? else {
            let pairs: Vec<Value> = children(&self.tree, node)
                .into_iter()
                .map(|(tag, selector)| json!([tag, selector]))
                .collect();
            return Ok(Value::Array(pairs));
        };

        let child = NodeKind::from_tag(tag)
            .filter(|child| kind.has_child(*child))
            .ok_or_else(|| CommandFailure::invalid(format!("{kind} has no child tag '{tag}'")))?;
        let items = self
            .tree
            .items(node, child, &self.tree.context())
            .unwrap_or_default();
        Ok(json!({
            "has_default": items.has_default,
            "items": items.items,
        }))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
