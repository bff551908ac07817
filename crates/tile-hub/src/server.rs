use std::{
    fs, io,
    path::{Path, PathBuf},
};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use tile_core::wire::{read_frame, write_frame};
use tile_core::{
    CommandRequest, CommandResponse, CommandTree, Dispatcher, ErrorKind, FrameError,
    DEFAULT_MAX_FRAME_BYTES,
};
use tokio::{
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixListener, UnixStream,
    },
    sync::{mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_frame_bytes: usize,
    /// Pending requests buffered in front of the dispatch task.
    pub queue_capacity: usize,
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A bound control socket. The path is unlinked when the server is closed,
/// when `run` returns, and when either is dropped early.
pub struct Server {
    config: ServerConfig,
    listener: UnixListener,
    socket: SocketGuard,
}

/// Unlinks the socket path on drop unless disarmed.
struct SocketGuard {
    path: Option<PathBuf>,
}

impl SocketGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    /// Removes the file now and reports the outcome; the drop becomes a no-op.
    fn release(mut self) -> io::Result<()> {
        match self.path.take() {
            Some(path) => remove_socket(&path),
            None => Ok(()),
        }
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = remove_socket(&path) {
                warn!(event = "hub_ipc_socket_cleanup_error", socket = %path.display(), error = %err);
            } else {
                debug!(event = "hub_ipc_socket_cleanup", socket = %path.display());
            }
        }
    }
}

struct Job {
    request: CommandRequest,
    reply: oneshot::Sender<CommandResponse>,
}

impl Server {
    /// Binds the socket, replacing a stale file. Must be called inside a
    /// tokio runtime.
    pub fn bind(config: ServerConfig) -> io::Result<Self> {
        if let Some(parent) = config.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                #[cfg(unix)]
                let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
            }
        }

        match fs::remove_file(&config.socket_path) {
            Ok(()) => {
                info!(event = "hub_ipc_stale_socket_removed", socket = %config.socket_path.display());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(event = "hub_ipc_stale_socket_error", socket = %config.socket_path.display(), error = %err);
            }
        }

        let listener = UnixListener::bind(&config.socket_path)?;
        let socket = SocketGuard::new(&config.socket_path);
        #[cfg(unix)]
        let _ = fs::set_permissions(&config.socket_path, fs::Permissions::from_mode(0o600));

        info!(
            event = "hub_ipc_bind",
            socket = %config.socket_path.display(),
            max_frame_bytes = config.max_frame_bytes,
            queue_capacity = config.queue_capacity
        );
        Ok(Self {
            config,
            listener,
            socket,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Releases a socket that was bound but never served.
    pub fn close(self) -> io::Result<()> {
        drop(self.listener);
        self.socket.release()
    }

    /// Serves `tree` until `shutdown` turns true or its sender is dropped,
    /// then hands the tree back.
    pub async fn run<T: CommandTree>(
        self,
        tree: T,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<T> {
        let Server {
            config,
            listener,
            socket,
        } = self;
        let (jobs, dispatch_task) = spawn_dispatcher(tree, config.queue_capacity);
        let conn_shutdown = shutdown.clone();
        let mut connections = JoinSet::new();
        let mut next_conn_id: u64 = 0;

        info!(event = "hub_ipc_start", socket = %config.socket_path.display());

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, _addr)) => {
                            next_conn_id += 1;
                            info!(event = "ipc_client_connected", conn_id = next_conn_id);
                            connections.spawn(handle_connection(
                                next_conn_id,
                                stream,
                                jobs.clone(),
                                conn_shutdown.clone(),
                                config.max_frame_bytes,
                            ));
                        }
                        Err(err) => {
                            warn!(event = "ipc_accept_error", error = %err);
                        }
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!(event = "ipc_connection_panicked", error = %err);
                    }
                }
            }
        }

        drop(listener);
        let open = connections.len();
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                warn!(event = "ipc_connection_panicked", error = %err);
            }
        }
        drop(jobs);
        let tree = dispatch_task.await;
        let removed = socket.release();
        info!(event = "hub_ipc_stop", socket = %config.socket_path.display(), drained = open);

        let tree = tree.map_err(|err| io::Error::other(format!("dispatch task failed: {err}")))?;
        removed?;
        Ok(tree)
    }
}

fn spawn_dispatcher<T: CommandTree>(tree: T, capacity: usize) -> (mpsc::Sender<Job>, JoinHandle<T>) {
    let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
    let task = tokio::spawn(async move {
        let mut dispatcher = Dispatcher::new(tree);
        while let Some(job) = rx.recv().await {
            let response = dispatcher.dispatch(&job.request);
            let _ = job.reply.send(response);
        }
        dispatcher.into_tree()
    });
    (tx, task)
}

fn remove_socket(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Resolves once the flag is true or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn handle_connection(
    conn_id: u64,
    stream: UnixStream,
    jobs: mpsc::Sender<Job>,
    mut shutdown: watch::Receiver<bool>,
    max_frame_bytes: usize,
) {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let frame = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!(event = "ipc_client_shutdown", conn_id);
                break;
            }
            frame = read_frame::<OwnedReadHalf, CommandRequest>(&mut reader, max_frame_bytes) => frame,
        };

        let request = match frame {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!(event = "ipc_client_disconnected", conn_id);
                break;
            }
            Err(err) if err.is_decode_error() => {
                warn!(event = "ipc_decode_error", conn_id, error = %err);
                let response = CommandResponse::error(ErrorKind::DecodeError, err.to_string());
                let _ = send_response(&mut writer, &response, max_frame_bytes).await;
                break;
            }
            Err(err) => {
                warn!(event = "ipc_read_error", conn_id, error = %err);
                break;
            }
        };

        let response = if request.version.is_supported() {
            submit(&jobs, request).await
        } else {
            warn!(event = "ipc_unsupported_version", conn_id, version = request.version.0);
            CommandResponse::error(
                ErrorKind::DecodeError,
                format!("unsupported protocol version {}", request.version.0),
            )
        };

        if let Err(err) = send_response(&mut writer, &response, max_frame_bytes).await {
            warn!(event = "ipc_write_error", conn_id, error = %err);
            break;
        }
    }
}

async fn submit(jobs: &mpsc::Sender<Job>, request: CommandRequest) -> CommandResponse {
    let (reply, response) = oneshot::channel();
    if jobs.send(Job { request, reply }).await.is_err() {
        return CommandResponse::error(ErrorKind::CommandException, "dispatcher is not running");
    }
    response.await.unwrap_or_else(|_| {
        CommandResponse::error(ErrorKind::CommandException, "dispatcher dropped the request")
    })
}

/// Writes `response`, replacing it with an error when it exceeds the frame limit.
async fn send_response(
    writer: &mut OwnedWriteHalf,
    response: &CommandResponse,
    max_frame_bytes: usize,
) -> Result<(), FrameError> {
    match write_frame(writer, response, max_frame_bytes).await {
        Err(err @ (FrameError::OversizedFrame { .. } | FrameError::Encode(_))) => {
            let fallback = CommandResponse::error(
                ErrorKind::CommandException,
                format!("response could not be sent: {err}"),
            );
            write_frame(writer, &fallback, max_frame_bytes).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_shutdown_returns_on_flag_or_drop() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        tx.send(true).expect("send");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timely")
            .expect("join");

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("sender dropped");
    }

    #[test]
    fn socket_guard_unlinks_on_drop() {
        let path = std::env::temp_dir().join(format!("tile-hub-guard-{}.sock", std::process::id()));
        fs::write(&path, b"").expect("file");
        drop(SocketGuard::new(&path));
        assert!(!path.exists());

        fs::write(&path, b"").expect("file");
        SocketGuard::new(&path).release().expect("release");
        assert!(!path.exists());
    }

    #[test]
    fn remove_socket_ignores_missing_file() {
        let path = std::env::temp_dir().join("tile-hub-no-such-socket.sock");
        assert!(remove_socket(&path).is_ok());
    }
}
