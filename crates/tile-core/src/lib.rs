pub mod client;
pub mod command;
pub mod dispatch;
pub mod path;
pub mod tree;
pub mod wire;

pub use client::{Client, ClientError};
pub use command::{
    BoundArgs, CommandDescriptor, CommandFailure, CommandSpec, CommandTable, Handler, Param,
};
pub use dispatch::Dispatcher;
pub use path::{NodeKind, Path, PathError, PathSegment, Selector};
pub use tree::{children, resolve, ChildItems, CommandTree, ResolutionContext, ResolveError};
pub use wire::{
    CommandRequest, CommandResponse, ErrorKind, FrameError, ProtocolVersion,
    DEFAULT_MAX_FRAME_BYTES,
};

use std::path::PathBuf;

pub const SOCKET_ENV: &str = "TILE_SOCKET";

/// Socket path used when nothing is configured: `TILE_SOCKET`, then
/// `$XDG_RUNTIME_DIR/tilewm/hub.sock`, then a per-user directory under `/tmp`.
pub fn default_socket_path() -> PathBuf {
    if let Some(value) = non_empty_env(SOCKET_ENV) {
        return PathBuf::from(value);
    }
    if let Some(runtime_dir) = non_empty_env("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("tilewm").join("hub.sock");
    }
    let owner = non_empty_env("UID")
        .or_else(|| non_empty_env("USER"))
        .unwrap_or_else(|| "default".to_string());
    PathBuf::from("/tmp")
        .join(format!("tilewm-{owner}"))
        .join("hub.sock")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
