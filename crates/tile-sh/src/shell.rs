use crate::call::CallParser;
use crate::columnize::columnize;
use crate::completion::{current_token, CompletionCycle};
use serde_json::{json, Map, Value};
use std::path::{Path as FsPath, PathBuf};
use thiserror::Error;
use tile_core::wire::CommandError;
use tile_core::{Client, ClientError, ErrorKind, NodeKind, Path};
use tracing::{debug, info};

pub const NO_SUCH_PATH: &str = "No such path.";
pub const DEFAULT_TERMWIDTH: usize = 80;

/// Shell built-ins and their help text, sorted by name.
const BUILTINS: [(&str, &str); 6] = [
    ("cd", "Change to an object, or back to a parent using '..'."),
    ("exit", "Exit the shell."),
    ("help", "Give help on commands and builtins."),
    ("ls", "List contained items on a node."),
    ("pwd", "Print current position in the hierarchy."),
    ("q", "Exit the shell."),
];

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid call pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug)]
enum CallFailure {
    Remote(CommandError),
    Transport(ClientError),
}

/// Navigation state and line interpreter for one hub connection.
pub struct Shell {
    socket_path: PathBuf,
    client: Option<Client>,
    current: Path,
    termwidth: usize,
    exit_requested: bool,
    completion: CompletionCycle,
    calls: CallParser,
}

impl Shell {
    pub async fn connect(socket_path: impl AsRef<FsPath>) -> Result<Self, ShellError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let client = Client::connect(&socket_path).await?;
        Ok(Self {
            socket_path,
            client: Some(client),
            current: Path::root(),
            termwidth: DEFAULT_TERMWIDTH,
            exit_requested: false,
            completion: CompletionCycle::default(),
            calls: CallParser::new()?,
        })
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.set_termwidth(width);
        self
    }

    pub fn set_termwidth(&mut self, width: usize) {
        self.termwidth = width.max(1);
    }

    pub fn termwidth(&self) -> usize {
        self.termwidth
    }

    pub fn current(&self) -> &Path {
        &self.current
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn prompt(&self) -> String {
        format!("{} > ", self.current)
    }

    /// Runs one input line and returns the text to print (possibly empty).
    pub async fn process_line(&mut self, line: &str) -> String {
        let line = line.trim();
        if line.is_empty() {
            return String::new();
        }

        let word_end = line
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(line.len());
        let (word, rest) = line.split_at(word_end);
        let rest = rest.trim();
        match word {
            "cd" => self.do_cd(rest).await,
            "ls" => self.do_ls(rest).await,
            "pwd" => self.pwd(),
            "help" => self.do_help(rest).await,
            "exit" | "q" => {
                self.exit_requested = true;
                String::new()
            }
            _ => self.do_call(line).await,
        }
    }

    pub fn pwd(&self) -> String {
        self.current.to_string()
    }

    pub async fn do_cd(&mut self, arg: &str) -> String {
        if arg.is_empty() {
            self.current = Path::root();
            return self.current.to_string();
        }
        let Ok(target) = self.current.navigate(arg) else {
            return NO_SUCH_PATH.to_string();
        };
        if !self.is_navigable(&target).await {
            return NO_SUCH_PATH.to_string();
        }
        debug!(event = "shell_cd", path = %target);
        self.current = target;
        self.current.to_string()
    }

    pub async fn do_ls(&mut self, arg: &str) -> String {
        let target = if arg.is_empty() {
            self.current.clone()
        } else {
            match self.current.navigate(arg) {
                Ok(target) => target,
                Err(_) => return NO_SUCH_PATH.to_string(),
            }
        };
        match self.labels(&target).await {
            Some(labels) => {
                let labels: Vec<String> = labels.into_iter().map(|label| label + "/").collect();
                columnize(&labels, self.termwidth)
            }
            None => NO_SUCH_PATH.to_string(),
        }
    }

    pub async fn do_help(&mut self, arg: &str) -> String {
        if arg.is_empty() {
            let builtins: Vec<&str> = BUILTINS.iter().map(|(name, _)| *name).collect();
            let commands = self.node_commands().await;
            return format!(
                "help command   -- Help for a specific command.\n\n\
                 Builtins\n========\n{}\n\n\
                 Commands for this object\n========================\n{}",
                columnize(&builtins, self.termwidth),
                columnize(&commands, self.termwidth),
            );
        }
        if let Some((_, doc)) = BUILTINS.iter().find(|(name, _)| *name == arg) {
            return (*doc).to_string();
        }
        let current = self.current.clone();
        match self.call(&current, "doc", vec![json!(arg)]).await {
            Ok(value) => render_value(value),
            Err(CallFailure::Remote(err)) if err.kind == ErrorKind::CommandNotFound => {
                format!("No such command: {arg}")
            }
            Err(failure) => render_failure(arg, failure),
        }
    }

    async fn do_call(&mut self, line: &str) -> String {
        let call = match self.calls.parse(line) {
            Ok(call) => call,
            Err(err) => {
                debug!(event = "shell_invalid_command", line, error = %err);
                return format!("Invalid command: {line}");
            }
        };
        let current = self.current.clone();
        let result = self
            .call_with_kwargs(&current, &call.name, call.args, call.kwargs)
            .await;
        match result {
            Ok(value) => render_value(value),
            Err(failure) => render_failure(&call.name, failure),
        }
    }

    /// Candidates for `token`, the last word of `buffer`.
    pub async fn complete(&mut self, buffer: &str, token: &str) -> Vec<String> {
        let trimmed = buffer.trim_start();
        if trimmed.starts_with("cd ") || trimmed.starts_with("ls ") {
            return self.complete_path(token).await;
        }
        if trimmed.starts_with("help ") || !(trimmed.contains(' ') || trimmed.contains('(')) {
            return self.complete_command(token).await;
        }
        Vec::new()
    }

    /// Completes `origin` with the next candidate, cycling on repeated calls
    /// with the same input.
    pub async fn complete_next(&mut self, origin: &str) -> Option<String> {
        let token = current_token(origin).to_string();
        if !self.completion.is_cached(origin, &token) {
            let candidates = self.complete(origin, &token).await;
            self.completion.fill(origin, &token, candidates);
        }
        let candidate = self.completion.next()?;
        let head = origin.strip_suffix(token.as_str()).unwrap_or(origin);
        Some(format!("{head}{candidate}"))
    }

    pub fn reset_completion(&mut self) {
        self.completion.reset();
    }

    async fn complete_command(&mut self, token: &str) -> Vec<String> {
        let mut candidates: Vec<String> = BUILTINS
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| name.starts_with(token))
            .map(str::to_string)
            .collect();
        candidates.extend(
            self.node_commands()
                .await
                .into_iter()
                .filter(|name| name.starts_with(token)),
        );
        candidates
    }

    async fn complete_path(&mut self, token: &str) -> Vec<String> {
        let (dir, partial) = match token.rfind('/') {
            Some(index) => (&token[..=index], &token[index + 1..]),
            None => ("", token),
        };
        let base = if dir.is_empty() {
            self.current.clone()
        } else {
            match self.current.navigate(dir) {
                Ok(base) => base,
                Err(_) => return Vec::new(),
            }
        };
        let mut matches: Vec<String> = self
            .labels(&base)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|label| label.starts_with(partial))
            .map(|label| format!("{dir}{label}"))
            .collect();
        if let [only] = matches.as_mut_slice() {
            only.push('/');
        }
        matches
    }

    /// A selected segment must resolve to a node; a bare tag only needs its
    /// parent to list it, so containers without a default can be entered.
    async fn is_navigable(&mut self, target: &Path) -> bool {
        match target.last() {
            None => true,
            Some(segment) if segment.selector.is_some() => {
                self.call(target, "commands", Vec::new()).await.is_ok()
            }
            Some(_) => self.labels(target).await.is_some(),
        }
    }

    /// Child labels one level below `target`, or `None` when it does not resolve.
    async fn labels(&mut self, target: &Path) -> Option<Vec<String>> {
        let Some(last) = target.last().cloned() else {
            return Some(tags(&NodeKind::TAGS));
        };
        let child_tags = tags(last.kind.children());
        if last.selector.is_some() {
            self.call(target, "commands", Vec::new()).await.ok()?;
            return Some(child_tags);
        }

        let listing = self
            .call(&target.parent(), "items", vec![json!(last.kind.as_str())])
            .await
            .ok()?;
        let has_default = listing
            .get("has_default")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut labels = if has_default { child_tags } else { Vec::new() };
        if let Some(items) = listing.get("items").and_then(Value::as_array) {
            labels.extend(items.iter().map(selector_label));
        }
        Some(labels)
    }

    async fn node_commands(&mut self) -> Vec<String> {
        let current = self.current.clone();
        match self.call(&current, "commands", Vec::new()).await {
            Ok(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn call(&mut self, path: &Path, command: &str, args: Vec<Value>) -> Result<Value, CallFailure> {
        self.call_with_kwargs(path, command, args, Map::new()).await
    }

    async fn call_with_kwargs(
        &mut self,
        path: &Path,
        command: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, CallFailure> {
        let client = self.client().await.map_err(CallFailure::Transport)?;
        let response = client
            .call_command(path.clone(), command, args, kwargs)
            .await
            .map_err(CallFailure::Transport)?;
        response.into_result().map_err(CallFailure::Remote)
    }

    /// The live client, reconnecting once if the previous connection closed.
    async fn client(&mut self) -> Result<&mut Client, ClientError> {
        if self.client.as_ref().map_or(true, Client::is_closed) {
            info!(event = "shell_reconnect", socket = %self.socket_path.display());
            self.client = Some(Client::connect(&self.socket_path).await?);
        }
        self.client.as_mut().ok_or(ClientError::Closed)
    }
}

fn tags(kinds: &[NodeKind]) -> Vec<String> {
    kinds.iter().map(|kind| kind.as_str().to_string()).collect()
}

fn selector_label(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

fn render_failure(command: &str, failure: CallFailure) -> String {
    match failure {
        CallFailure::Remote(err) => match err.kind {
            ErrorKind::PathNotFound => NO_SUCH_PATH.to_string(),
            ErrorKind::CommandNotFound => format!("Command does not exist: {command}"),
            ErrorKind::InvalidArguments | ErrorKind::CommandException => {
                format!("Command exception: {}", err.message)
            }
            ErrorKind::DecodeError | ErrorKind::ConnectionError => {
                format!("Command error: {}", err.message)
            }
        },
        CallFailure::Transport(err) => format!("Connection error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_render_as_text() {
        assert_eq!(render_value(json!("OK")), "OK");
        assert_eq!(render_value(Value::Null), "");
        assert_eq!(render_value(json!(3)), "3");
        assert_eq!(render_value(json!({"a": 1})), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn failures_render_as_short_text() {
        let remote = |kind, message: &str| {
            CallFailure::Remote(CommandError {
                kind,
                message: message.to_string(),
            })
        };
        assert_eq!(
            render_failure("x", remote(ErrorKind::PathNotFound, "gone")),
            NO_SUCH_PATH
        );
        assert_eq!(
            render_failure("wibble", remote(ErrorKind::CommandNotFound, "no")),
            "Command does not exist: wibble"
        );
        assert_eq!(
            render_failure("f", remote(ErrorKind::CommandException, "boom")),
            "Command exception: boom"
        );
        assert_eq!(
            render_failure("f", CallFailure::Transport(ClientError::Disconnected)),
            "Connection error: server closed the connection"
        );
    }

    #[test]
    fn builtins_are_sorted() {
        let names: Vec<&str> = BUILTINS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
